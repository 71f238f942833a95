//! chatdeck - terminal client for a streaming RAG chat backend
//!
//! USAGE:
//!   chatdeck                          # interactive TUI
//!   chatdeck ask "..." [--attach P]   # one-shot, streams to stdout
//!   chatdeck history [--pages N]      # list past conversations
//!   chatdeck doctor                   # check config, user id, backend
//!   chatdeck models [filter]          # model catalog
//!   chatdeck config set <key> <value> # non-interactive config

use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;

use chatdeck::attachment::Attachment;
use chatdeck::client::ApiClient;
use chatdeck::config::{self, Config};
use chatdeck::history::{FetchOutcome, HistoryPaginator};
use chatdeck::retrieval::DEFAULT_N_RESULTS;
use chatdeck::{logging, models, ui, ChatBackend, ChatEngine, ChatMode, StreamOutcome};

// ═══════════════════════════════════════════════════════════════
// CLI
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, PartialEq)]
enum Command {
    Interactive,
    Ask {
        text: String,
        attach: Vec<PathBuf>,
        mode: String,
        stream: bool,
    },
    History {
        pages: usize,
        user: Option<String>,
    },
    Doctor,
    Models {
        filter: String,
    },
    ConfigSet {
        key: String,
        value: String,
    },
    Help,
}

struct Cli {
    command: Command,
    verbose: bool,
}

fn parse_args() -> Cli {
    parse_args_from(std::env::args().skip(1).collect())
}

fn parse_args_from(mut args: Vec<String>) -> Cli {
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    args.retain(|a| a != "--verbose" && a != "-v");

    let command = parse_command(&args);
    Cli { command, verbose }
}

fn parse_command(args: &[String]) -> Command {
    if args.is_empty() {
        return Command::Interactive;
    }

    if args.iter().any(|a| a == "--help" || a == "-h") {
        return Command::Help;
    }

    match args[0].as_str() {
        "doctor" => Command::Doctor,
        "models" => Command::Models {
            filter: args[1..].join(" "),
        },
        "config" if args.get(1).map(|s| s.as_str()) == Some("set") => Command::ConfigSet {
            key: args.get(2).cloned().unwrap_or_default(),
            value: args.get(3).cloned().unwrap_or_default(),
        },
        "history" => {
            let mut pages = 1;
            let mut user = None;
            let mut i = 1;
            while i < args.len() {
                match args[i].as_str() {
                    "--pages" | "-p" => {
                        i += 1;
                        pages = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(1);
                    }
                    "--user" | "-u" => {
                        i += 1;
                        user = args.get(i).cloned();
                    }
                    _ => {}
                }
                i += 1;
            }
            Command::History { pages, user }
        }
        "ask" => {
            let mut words = Vec::new();
            let mut attach = Vec::new();
            let mut mode = String::new();
            let mut stream = true;
            let mut i = 1;
            while i < args.len() {
                match args[i].as_str() {
                    "--attach" | "-a" => {
                        i += 1;
                        if let Some(p) = args.get(i) {
                            attach.push(PathBuf::from(p));
                        }
                    }
                    "--mode" | "-m" => {
                        i += 1;
                        mode = args.get(i).cloned().unwrap_or_default();
                    }
                    "--no-stream" => stream = false,
                    s => words.push(s.to_string()),
                }
                i += 1;
            }
            Command::Ask {
                text: words.join(" "),
                attach,
                mode,
                stream,
            }
        }
        _ => Command::Help,
    }
}

fn print_help() {
    println!(r#"chatdeck - terminal client for a streaming RAG chat backend

USAGE:
    chatdeck                             # interactive TUI
    chatdeck ask "<text>" [OPTIONS]      # one-shot question, streamed to stdout
    chatdeck history [--pages N] [--user ID]
    chatdeck doctor                      # check config, user id, backend
    chatdeck models [filter]             # fuzzy-filtered model catalog
    chatdeck config set <key> <value>    # url, provider, model, temperature, max_tokens

ASK OPTIONS:
    -a, --attach <path>     Attach a file (repeatable)
    -m, --mode <mode>       plain, chat, search, summary, rag
        --no-stream         Wait for the whole reply

FLAGS:
    -v, --verbose           Debug logging
    -h, --help              Show this help

CONFIG:
    ~/.config/chatdeck/config.json    Backend URL, user id, chat defaults
    ~/.local/state/chatdeck/          Log file

ENVIRONMENT:
    CHATDECK_API_URL                  Override backend URL from config
    CHATDECK_LOG                      Log filter (RUST_LOG also works)

CONTROLS (interactive mode):
    Enter   Send / run /command
    Tab     Switch tabs
    Esc     Quit
"#);
}

// ═══════════════════════════════════════════════════════════════
// MAIN
// ═══════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_args();
    if cli.command == Command::Help {
        print_help();
        return Ok(());
    }

    let _log_guard = logging::init(cli.verbose).context("Failed to set up logging")?;

    match cli.command {
        Command::Help => Ok(()),
        Command::Doctor => run_doctor().await,
        Command::Models { filter } => run_models(&filter),
        Command::ConfigSet { key, value } => run_config_set(&key, &value),
        Command::History { pages, user } => run_history(pages, user).await,
        Command::Ask {
            text,
            attach,
            mode,
            stream,
        } => run_ask(&text, &attach, &mode, stream).await,
        Command::Interactive => run_interactive().await,
    }
}

// ═══════════════════════════════════════════════════════════════
// COMMANDS
// ═══════════════════════════════════════════════════════════════

fn check(ok: bool) -> &'static str {
    if ok { "✓" } else { "✗" }
}

async fn run_doctor() -> Result<()> {
    println!("chatdeck doctor\n");

    let path = config::config_path()?;
    let mut cfg = Config::load()?;
    println!("[{}] Config: {}", check(path.exists()), path.display());

    let user_id = cfg.user_id()?;
    println!("[✓] User id: {}", user_id);
    println!(
        "[✓] Chat: {} {} (temperature {}, max {} tokens)",
        cfg.provider, cfg.model, cfg.temperature, cfg.max_tokens
    );
    println!("[✓] Log: {}", logging::log_path()?.display());

    let url = cfg.api_url();
    print!("[?] Backend {}: checking...", url);
    std::io::stdout().flush()?;
    let client = ApiClient::new(&url)?;
    match client.check_health().await {
        Ok(health) if health.status == "ok" => {
            println!("\r[✓] Backend {}: online          ", url)
        }
        Ok(health) => println!("\r[✗] Backend {}: status {}      ", url, health.status),
        Err(e) => println!("\r[✗] Backend {}: {}", url, e),
    }

    Ok(())
}

fn run_models(filter: &str) -> Result<()> {
    let cfg = Config::load()?;
    let found = models::filter_models(filter);
    if found.is_empty() {
        println!("No models match '{}'", filter);
        return Ok(());
    }
    for m in found {
        let current = if m.id == cfg.model { "*" } else { " " };
        println!("{} {:<11} {}", current, m.provider.as_str(), m.id);
    }
    Ok(())
}

fn run_config_set(key: &str, value: &str) -> Result<()> {
    let mut cfg = Config::load()?;
    cfg.set(key, value)?;
    cfg.save()?;
    println!("Set {} = {} in {}", key, value, config::config_path()?.display());
    Ok(())
}

async fn run_history(pages: usize, user: Option<String>) -> Result<()> {
    let mut cfg = Config::load()?;
    let user = match user {
        Some(u) => u,
        None => cfg.user_id()?,
    };
    let client = ApiClient::new(&cfg.api_url())?;
    let mut pager = HistoryPaginator::new(cfg.history_page_size, cfg.max_loaded_pages, Some(user));

    let mut outcome = pager.open(&client).await;
    for _ in 1..pages.max(1) {
        if !matches!(outcome, FetchOutcome::Loaded(_)) || !pager.has_more() {
            break;
        }
        outcome = pager.load_more(&client).await;
    }
    if let FetchOutcome::Failed(e) = outcome {
        anyhow::bail!("History unavailable: {}", e);
    }

    if pager.items().is_empty() {
        println!("No history");
        return Ok(());
    }
    for item in pager.items() {
        println!(
            "{}  {}  {}",
            item.date_label,
            item.session_id.get(..8).unwrap_or(&item.session_id),
            item.last_message_preview
        );
    }
    if pager.has_more() {
        println!("... more with --pages {}", pager.loaded_page_count() + 2);
    }
    Ok(())
}

async fn run_ask(text: &str, attach: &[PathBuf], mode: &str, stream: bool) -> Result<()> {
    let mut cfg = Config::load()?;
    let user_id = cfg.user_id()?;
    let client = ApiClient::new(&cfg.api_url())?;
    let mut engine = ChatEngine::new(cfg.engine_options(user_id));

    for path in attach {
        let attachment = Attachment::from_path(path)
            .with_context(|| format!("Failed to attach {}", path.display()))?;
        engine.attach(attachment);
    }
    print_notices(&mut engine);

    let mut mode: ChatMode = mode.parse()?;
    if let ChatMode::Retrieval(_) = mode {
        let docs = engine
            .retrieval_mut()
            .retrieve(&client, text, DEFAULT_N_RESULTS)
            .await
            .context("Retrieval failed")?;
        eprintln!("[retrieved {} documents]", docs.len());
        mode = ChatMode::from_documents(docs);
    }

    engine.set_input(text);
    let outcome = if stream {
        let prepared = engine.begin_submit(mode)?;
        let mut rx = client.open_stream(prepared.request).await;
        let mut stdout = std::io::stdout();
        let outcome = engine
            .drive_with(&mut rx, |chunk| {
                let _ = write!(stdout, "{}", chunk);
                let _ = stdout.flush();
            })
            .await;
        println!();
        outcome
    } else {
        let outcome = engine.submit_whole(&client, mode).await?;
        if let Some(reply) = engine.transcript().last() {
            println!("{}", reply.text);
        }
        outcome
    };
    print_notices(&mut engine);

    match outcome {
        StreamOutcome::Completed => Ok(()),
        StreamOutcome::Failed(reason) => anyhow::bail!("Request failed: {}", reason),
    }
}

fn print_notices(engine: &mut ChatEngine) {
    for line in notice_lines(engine) {
        eprintln!("{}", line);
    }
}

fn notice_lines(engine: &mut ChatEngine) -> Vec<String> {
    engine
        .take_notices()
        .into_iter()
        .map(|notice| format!("[{}]", notice.0))
        .collect()
}

async fn run_interactive() -> Result<()> {
    let mut cfg = Config::load()?;
    let user_id = cfg.user_id()?;
    ui::run_tui(&cfg, user_id).await
}
