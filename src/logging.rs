//! Log file setup
//!
//! The TUI owns the terminal, so logs go to ~/.local/state/chatdeck/chatdeck.log.
//! Filter comes from CHATDECK_LOG, then RUST_LOG, then the default.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config;

pub const LOG_ENV: &str = "CHATDECK_LOG";
pub const LOG_FILE: &str = "chatdeck.log";
const DEFAULT_FILTER: &str = "chatdeck=info";
const VERBOSE_FILTER: &str = "chatdeck=debug";

pub fn log_path() -> Result<PathBuf> {
    Ok(config::state_dir()?.join(LOG_FILE))
}

fn env_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber. Keep the guard alive until exit so
/// buffered lines get flushed.
pub fn init(verbose: bool) -> Result<WorkerGuard> {
    config::ensure_dirs()?;
    init_at(&log_path()?, verbose)
}

pub fn init_at(path: &Path, verbose: bool) -> Result<WorkerGuard> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(file);
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_filter(env_filter(verbose));

    // A second init (tests, repeated calls) keeps the first subscriber
    let _ = tracing_subscriber::registry().with(layer).try_init();
    Ok(guard)
}

/// Last `n` lines of the log, for the Log tab
pub fn tail(path: &Path, n: usize) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].iter().map(|l| l.to_string()).collect()
}
