//! Configuration management with XDG paths
//!
//! ~/.config/chatdeck/config.json - backend URL, user id, chat defaults (0600)
//! ~/.local/state/chatdeck/       - Log files

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::client::DEFAULT_API_URL;
use crate::engine::EngineOptions;
use crate::history::{DEFAULT_MAX_LOADED_PAGES, DEFAULT_PAGE_SIZE};
use crate::models::{self, Provider};
use crate::settings::{self, Settings, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};

const APP_NAME: &str = "chatdeck";
pub const API_URL_ENV: &str = "CHATDECK_API_URL";

/// Get config directory (~/.config/chatdeck/)
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .context("Could not determine config directory")?;
    Ok(base.join(APP_NAME))
}

/// Get state directory (~/.local/state/chatdeck/)
pub fn state_dir() -> Result<PathBuf> {
    let base = dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local/state")))
        .context("Could not determine state directory")?;
    Ok(base.join(APP_NAME))
}

/// Get config file path
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

/// Ensure all directories exist
pub fn ensure_dirs() -> Result<()> {
    fs::create_dir_all(config_dir()?)?;
    fs::create_dir_all(state_dir()?)?;
    Ok(())
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_url")]
    pub api_base_url: String,

    /// Anonymous id sent with every request; created on first use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default = "default_provider")]
    pub provider: Provider,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_page_size")]
    pub history_page_size: usize,

    #[serde(default = "default_max_pages")]
    pub max_loaded_pages: usize,

    /// Fail a stream that sends nothing for this long
    #[serde(default = "default_idle_timeout")]
    pub stream_idle_timeout_secs: u64,

    #[serde(default = "default_poll_secs")]
    pub status_poll_secs: u64,
}

fn default_api_url() -> String { DEFAULT_API_URL.to_string() }
fn default_provider() -> Provider { models::DEFAULT_PROVIDER }
fn default_model() -> String { models::DEFAULT_MODEL.to_string() }
fn default_temperature() -> f32 { DEFAULT_TEMPERATURE }
fn default_max_tokens() -> u32 { DEFAULT_MAX_TOKENS }
fn default_page_size() -> usize { DEFAULT_PAGE_SIZE }
fn default_max_pages() -> usize { DEFAULT_MAX_LOADED_PAGES }
fn default_idle_timeout() -> u64 { 90 }
fn default_poll_secs() -> u64 { 30 }

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_url(),
            user_id: None,
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            history_page_size: default_page_size(),
            max_loaded_pages: default_max_pages(),
            stream_idle_timeout_secs: default_idle_timeout(),
            status_poll_secs: default_poll_secs(),
        }
    }
}

impl Config {
    /// Load config from disk, or return defaults
    pub fn load() -> Result<Self> {
        ensure_dirs()?;
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.clamp_settings();
        Ok(config)
    }

    /// Out-of-range values from a hand-edited file fall back to the defaults
    fn clamp_settings(&mut self) {
        if let Err(e) = settings::validate_temperature(self.temperature) {
            warn!(value = self.temperature, "config temperature ignored: {}", e);
            self.temperature = DEFAULT_TEMPERATURE;
        }
        if let Err(e) = settings::validate_max_tokens(self.max_tokens) {
            warn!(value = self.max_tokens, "config max_tokens ignored: {}", e);
            self.max_tokens = DEFAULT_MAX_TOKENS;
        }
    }

    /// Save config to disk with secure permissions
    pub fn save(&self) -> Result<()> {
        ensure_dirs()?;
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, &content)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        // Owner read/write only: the file carries the user id
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;

        Ok(())
    }

    /// Base URL, with the environment taking precedence
    pub fn api_url(&self) -> String {
        match std::env::var(API_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => url,
            _ => self.api_base_url.clone(),
        }
    }

    /// Return the stored user id, generating one if missing.
    /// Returns whether the config changed and needs saving.
    pub fn ensure_user_id(&mut self) -> (String, bool) {
        match &self.user_id {
            Some(id) if !id.trim().is_empty() => (id.clone(), false),
            _ => {
                let id = Uuid::new_v4().to_string();
                self.user_id = Some(id.clone());
                (id, true)
            }
        }
    }

    /// Get-or-create the anonymous user id, persisting a new one
    pub fn user_id(&mut self) -> Result<String> {
        let (id, created) = self.ensure_user_id();
        if created {
            self.save().context("Failed to persist new user id")?;
        }
        Ok(id)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            provider: self.provider,
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn engine_options(&self, user_id: String) -> EngineOptions {
        EngineOptions {
            user_id,
            settings: self.settings(),
            history_page_size: self.history_page_size.max(1),
            max_loaded_pages: self.max_loaded_pages,
            idle_timeout: Duration::from_secs(self.stream_idle_timeout_secs.max(1)),
        }
    }

    /// Apply `config set <key> <value>`
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "url" | "api_base_url" => {
                let value = value.trim();
                if !(value.starts_with("http://") || value.starts_with("https://")) {
                    anyhow::bail!("URL must start with http:// or https://");
                }
                self.api_base_url = value.trim_end_matches('/').to_string();
            }
            "provider" => {
                self.provider = value.parse()?;
                self.model = self.provider.default_model().to_string();
            }
            "model" => {
                if let Some(info) = models::find_model(value) {
                    self.provider = info.provider;
                }
                self.model = value.to_string();
            }
            "temperature" | "temp" => {
                let t: f32 = value.parse().context("temperature must be a number")?;
                self.settings_with(|s| s.temperature = t)?;
            }
            "max_tokens" | "tokens" => {
                let n: u32 = value.parse().context("max_tokens must be an integer")?;
                self.settings_with(|s| s.max_tokens = n)?;
            }
            other => anyhow::bail!(
                "Unknown key '{}'. Keys: url, provider, model, temperature, max_tokens",
                other
            ),
        }
        Ok(())
    }

    fn settings_with(&mut self, change: impl FnOnce(&mut Settings)) -> Result<()> {
        let mut settings = self.settings();
        change(&mut settings);
        settings.validate()?;
        self.temperature = settings.temperature;
        self.max_tokens = settings.max_tokens;
        Ok(())
    }
}
