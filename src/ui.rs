//! TUI and interactive components
//!
//! Features:
//! - Chat tab with live streaming replies and slash commands
//! - History tab with paged session summaries
//! - Fuzzy model picker
//! - Backend status in the status bar

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Tabs, Wrap},
};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::attachment::Attachment;
use crate::client::ApiClient;
use crate::config::Config;
use crate::engine::{ChatEngine, ChatMode, StreamOutcome};
use crate::health::{self, BackendStatus};
use crate::logging;
use crate::history::FetchOutcome;
use crate::models::{self, ModelInfo, Provider};
use crate::retrieval::DEFAULT_N_RESULTS;
use crate::transcript::{Message, Sender};
use crate::transport::{ChatBackend, StreamEvent};

type Term = Terminal<CrosstermBackend<io::Stdout>>;

// ═══════════════════════════════════════════════════════════════
// SLASH COMMANDS
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum SlashCommand {
    New,
    Attach(String),
    /// 1-based index; `None` drops every attachment
    Detach(Option<usize>),
    Mode(ChatMode),
    Provider(Provider),
    /// `None` opens the picker
    Model(Option<String>),
    Temperature(f32),
    MaxTokens(u32),
    Defaults,
    History,
    More,
    Load(usize),
    User(String),
    UserReset,
    RagAdd(String),
    RagQuery(String),
    RagClear,
    Help,
    Quit,
}

pub const SLASH_HELP: &str = "/new /attach <path> /detach [n] /mode <plain|chat|search|summary|rag> \
/provider <name> /model [id] /temp <f> /tokens <n> /defaults /history /more /load <n> \
/user <id> /user-reset /rag add <path> /rag query <text> /rag clear /quit";

/// Parse a line starting with '/'. Returns `None` for ordinary input.
pub fn parse_slash(line: &str) -> Option<Result<SlashCommand, String>> {
    let line = line.trim();
    let rest = line.strip_prefix('/')?;
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((n, a)) => (n, a.trim()),
        None => (rest, ""),
    };

    let need = |what: &str| -> Result<String, String> {
        if arg.is_empty() {
            Err(format!("/{} needs {}", name, what))
        } else {
            Ok(arg.to_string())
        }
    };

    let cmd = match name {
        "new" => Ok(SlashCommand::New),
        "attach" => need("a path").map(SlashCommand::Attach),
        "detach" => {
            if arg.is_empty() {
                Ok(SlashCommand::Detach(None))
            } else {
                arg.parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .map(|n| SlashCommand::Detach(Some(n)))
                    .ok_or_else(|| format!("bad attachment number '{}'", arg))
            }
        }
        "mode" => arg.parse::<ChatMode>().map(SlashCommand::Mode).map_err(|e| e.to_string()),
        "provider" => need("a provider name").and_then(|p| {
            p.parse::<Provider>()
                .map(SlashCommand::Provider)
                .map_err(|e| e.to_string())
        }),
        "model" => Ok(SlashCommand::Model((!arg.is_empty()).then(|| arg.to_string()))),
        "temp" => arg
            .parse::<f32>()
            .map(SlashCommand::Temperature)
            .map_err(|_| format!("bad temperature '{}'", arg)),
        "tokens" => arg
            .parse::<u32>()
            .map(SlashCommand::MaxTokens)
            .map_err(|_| format!("bad token count '{}'", arg)),
        "defaults" => Ok(SlashCommand::Defaults),
        "history" => Ok(SlashCommand::History),
        "more" => Ok(SlashCommand::More),
        "load" => arg
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .map(SlashCommand::Load)
            .ok_or_else(|| format!("bad history number '{}'", arg)),
        "user" => need("a user id").map(SlashCommand::User),
        "user-reset" => Ok(SlashCommand::UserReset),
        "rag" => match arg.split_once(char::is_whitespace) {
            Some(("add", path)) => Ok(SlashCommand::RagAdd(path.trim().to_string())),
            Some(("query", text)) => Ok(SlashCommand::RagQuery(text.trim().to_string())),
            None if arg == "clear" => Ok(SlashCommand::RagClear),
            _ => Err("usage: /rag add <path> | /rag query <text> | /rag clear".to_string()),
        },
        "help" | "?" => Ok(SlashCommand::Help),
        "quit" | "q" => Ok(SlashCommand::Quit),
        other => Err(format!("unknown command /{}", other)),
    };
    Some(cmd)
}

// ═══════════════════════════════════════════════════════════════
// MODEL PICKER
// ═══════════════════════════════════════════════════════════════

/// Pick a catalog model with fuzzy search. `None` when cancelled.
fn run_picker(terminal: &mut Term) -> Result<Option<&'static str>> {
    let mut filter = String::new();
    let mut list_state = ListState::default();
    list_state.select(Some(0));

    loop {
        let filtered: Vec<&'static ModelInfo> = models::filter_models(&filter);

        // Clamp selection
        if let Some(selected) = list_state.selected() {
            if selected >= filtered.len() {
                list_state.select(Some(filtered.len().saturating_sub(1)));
            }
        }

        terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(3),
                    Constraint::Min(5),
                    Constraint::Length(1),
                ])
                .split(f.size());

            let input = Paragraph::new(filter.as_str())
                .block(Block::default().borders(Borders::ALL).title("Search models"));
            f.render_widget(input, chunks[0]);

            let items: Vec<ListItem> = filtered
                .iter()
                .map(|m| ListItem::new(format!("{} [{}]", m.display_name(), m.provider)))
                .collect();

            let list = List::new(items)
                .block(Block::default().borders(Borders::ALL).title(format!(
                    "Models ({}/{})",
                    filtered.len(),
                    models::CATALOG.len()
                )))
                .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
                .highlight_symbol("> ");
            f.render_stateful_widget(list, chunks[1], &mut list_state);

            let help = Paragraph::new("Enter: select | Esc: cancel | Type to filter")
                .style(Style::default().fg(Color::DarkGray));
            f.render_widget(help, chunks[2]);
        })?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }

                match key.code {
                    KeyCode::Esc => return Ok(None),
                    KeyCode::Enter => {
                        if let Some(model) = list_state.selected().and_then(|i| filtered.get(i)) {
                            return Ok(Some(model.id));
                        }
                    }
                    KeyCode::Up => {
                        let i = list_state.selected().unwrap_or(0);
                        list_state.select(Some(i.saturating_sub(1)));
                    }
                    KeyCode::Down => {
                        let i = list_state.selected().unwrap_or(0);
                        list_state.select(Some((i + 1).min(filtered.len().saturating_sub(1))));
                    }
                    KeyCode::Char(c) => {
                        filter.push(c);
                        list_state.select(Some(0));
                    }
                    KeyCode::Backspace => {
                        filter.pop();
                        list_state.select(Some(0));
                    }
                    _ => {}
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// MAIN TUI
// ═══════════════════════════════════════════════════════════════

/// Tab selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Chat,
    History,
    Log,
}

impl Tab {
    fn all() -> &'static [Tab] {
        &[Tab::Chat, Tab::History, Tab::Log]
    }

    fn name(&self) -> &'static str {
        match self {
            Tab::Chat => "Chat",
            Tab::History => "History",
            Tab::Log => "Log",
        }
    }
}

/// Reply currently streaming into the engine
struct ActiveStream {
    rx: mpsc::Receiver<StreamEvent>,
    last_progress: Instant,
    received: usize,
}

const FILE_LOG_LINES: usize = 50;
/// Re-read the log file every this many ticks while the Log tab is open
const FILE_LOG_REFRESH_TICKS: usize = 20;

/// Main TUI state
struct TuiState {
    tab: Tab,
    engine: ChatEngine,
    mode: ChatMode,
    stream: Option<ActiveStream>,
    log: Vec<String>,
    /// Tail of the tracing log file, refreshed while the Log tab is shown
    file_log: Vec<String>,
    log_file: Option<PathBuf>,
    notice: Option<String>,
    history_list: ListState,
    status: watch::Receiver<BackendStatus>,
    tick: usize,
    quit: bool,
}

impl TuiState {
    fn log(&mut self, msg: impl Into<String>) {
        let now = chrono::Local::now().format("%H:%M:%S");
        self.log.push(format!("[{}] {}", now, msg.into()));
    }

    /// Show in the status bar and keep in the log
    fn notify(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        self.log(msg.clone());
        self.notice = Some(msg);
    }

    /// Retrieval mode picks up whatever the panel retrieved last
    fn submit_mode(&self) -> ChatMode {
        match &self.mode {
            ChatMode::Retrieval(_) => ChatMode::from_documents(self.engine.retrieval().documents()),
            other => other.clone(),
        }
    }

    fn refresh_file_log(&mut self) {
        if let Some(path) = &self.log_file {
            self.file_log = logging::tail(path, FILE_LOG_LINES);
        }
    }

    fn drain_notices(&mut self) {
        for notice in self.engine.take_notices() {
            self.notify(notice.0);
        }
    }
}

/// Run the main TUI
pub async fn run_tui(config: &Config, user_id: String) -> Result<()> {
    let client = ApiClient::new(&config.api_url())?;
    let (status, poller) = health::spawn_status_poller(
        client.clone(),
        Duration::from_secs(config.status_poll_secs.max(1)),
    );

    let mut state = TuiState {
        tab: Tab::Chat,
        engine: ChatEngine::new(config.engine_options(user_id)),
        mode: ChatMode::Plain,
        stream: None,
        log: Vec::new(),
        file_log: Vec::new(),
        log_file: logging::log_path().ok(),
        notice: None,
        history_list: ListState::default(),
        status,
        tick: 0,
        quit: false,
    };
    state.log(format!("Backend: {}", client.base_url()));
    state.log(format!("User: {}", state.engine.user_id()));
    state.log("Type /help for commands");

    let mut terminal = setup_terminal()?;
    let result = run_tui_loop(&mut terminal, &mut state, &client).await;
    restore_terminal(terminal)?;
    poller.abort();
    result
}

async fn run_tui_loop(terminal: &mut Term, state: &mut TuiState, client: &ApiClient) -> Result<()> {
    while !state.quit {
        state.tick += 1;

        pump_stream(state);
        state.drain_notices();
        if state.tab == Tab::Log && state.tick % FILE_LOG_REFRESH_TICKS == 0 {
            state.refresh_file_log();
        }

        terminal.draw(|f| render_tui(f, state))?;

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        // Global controls
        match key.code {
            KeyCode::Esc => break,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
            KeyCode::Tab => {
                let tabs = Tab::all();
                let idx = tabs.iter().position(|t| *t == state.tab).unwrap_or(0);
                state.tab = tabs[(idx + 1) % tabs.len()];
                if state.tab == Tab::History && state.engine.history().items().is_empty() {
                    let outcome = state.engine.history_mut().open(client).await;
                    report_fetch(state, &outcome);
                }
                if state.tab == Tab::Log {
                    state.refresh_file_log();
                }
                continue;
            }
            _ => {}
        }

        match state.tab {
            Tab::Chat => handle_chat_key(terminal, state, client, key.code).await?,
            Tab::History => handle_history_key(state, client, key.code).await,
            Tab::Log => {}
        }
    }

    Ok(())
}

/// Move queued events into the engine and enforce the idle timeout
fn pump_stream(state: &mut TuiState) {
    let Some(active) = state.stream.as_mut() else {
        return;
    };

    let mut outcome = state.engine.pump(&mut active.rx);
    let received = state.engine.transcript().last().map_or(0, |m| m.text.len());
    if received != active.received {
        active.received = received;
        active.last_progress = Instant::now();
    }

    let idle = state.engine.idle_timeout();
    if outcome.is_none() && active.last_progress.elapsed() >= idle {
        outcome = state
            .engine
            .fail_stream(format!("no response for {}s", idle.as_secs()));
    }

    if let Some(outcome) = outcome {
        state.stream = None;
        match outcome {
            StreamOutcome::Completed => state.log("Reply complete"),
            StreamOutcome::Failed(reason) => state.log(format!("Reply failed: {}", reason)),
        }
    }
}

async fn handle_chat_key(
    terminal: &mut Term,
    state: &mut TuiState,
    client: &ApiClient,
    code: KeyCode,
) -> Result<()> {
    match code {
        KeyCode::Enter => {
            let line = state.engine.input().to_string();
            match parse_slash(&line) {
                Some(Ok(cmd)) => {
                    state.engine.set_input("");
                    run_slash(terminal, state, client, cmd).await?;
                }
                Some(Err(e)) => state.notify(e),
                None => submit(state, client).await,
            }
        }
        KeyCode::Char(c) => state.engine.input_mut().push(c),
        KeyCode::Backspace => {
            state.engine.input_mut().pop();
        }
        _ => {}
    }
    Ok(())
}

async fn submit(state: &mut TuiState, client: &ApiClient) {
    let mode = state.submit_mode();
    match state.engine.begin_submit(mode) {
        Ok(prepared) => {
            state.notice = None;
            let rx = client.open_stream(prepared.request).await;
            state.stream = Some(ActiveStream {
                rx,
                last_progress: Instant::now(),
                received: 0,
            });
        }
        Err(e) => state.notify(e.to_string()),
    }
}

async fn handle_history_key(state: &mut TuiState, client: &ApiClient, code: KeyCode) {
    let len = state.engine.history().items().len();
    match code {
        KeyCode::Up => {
            let i = state.history_list.selected().unwrap_or(0);
            state.history_list.select(Some(i.saturating_sub(1)));
        }
        KeyCode::Down => {
            let i = state.history_list.selected().map_or(0, |i| i + 1);
            state.history_list.select(Some(i.min(len.saturating_sub(1))));
            // Reaching the end pulls the next page
            if i + 1 >= len {
                let outcome = state.engine.history_mut().load_more(client).await;
                report_fetch(state, &outcome);
            }
        }
        KeyCode::Enter => {
            if let Some(i) = state.history_list.selected() {
                load_history_item(state, client, i).await;
            }
        }
        KeyCode::Char('m') => {
            let outcome = state.engine.history_mut().load_more(client).await;
            report_fetch(state, &outcome);
        }
        KeyCode::Char('r') => {
            let outcome = state.engine.history_mut().fetch_page(client, 0, false, true).await;
            state.history_list.select(Some(0));
            report_fetch(state, &outcome);
        }
        _ => {}
    }
}

async fn load_history_item(state: &mut TuiState, client: &ApiClient, index: usize) {
    let Some(session_id) = state
        .engine
        .history()
        .items()
        .get(index)
        .map(|item| item.session_id.clone())
    else {
        state.notify(format!("no history item {}", index + 1));
        return;
    };
    match state.engine.load_session(client, &session_id).await {
        Ok(count) => {
            state.tab = Tab::Chat;
            state.notify(format!("Loaded session {} ({} messages)", short_id(&session_id), count));
        }
        Err(e) => state.notify(format!("Could not load session: {}", e)),
    }
}

fn report_fetch(state: &mut TuiState, outcome: &FetchOutcome) {
    match outcome {
        FetchOutcome::Loaded(page) => state.log(format!(
            "History: {} items{}",
            page.items.len(),
            if page.has_more { ", more available" } else { "" }
        )),
        FetchOutcome::CapReached => state.notify("History page limit reached"),
        FetchOutcome::Failed(e) => state.notify(format!("History unavailable: {}", e)),
        FetchOutcome::Skipped => {}
    }
}

async fn run_slash(
    terminal: &mut Term,
    state: &mut TuiState,
    client: &ApiClient,
    cmd: SlashCommand,
) -> Result<()> {
    info!(?cmd, "slash command");
    match cmd {
        SlashCommand::New => match state.engine.new_chat() {
            Ok(()) => state.notify("New chat"),
            Err(e) => state.notify(e.to_string()),
        },
        SlashCommand::Attach(path) => match Attachment::from_path(Path::new(&path)) {
            Ok(att) => {
                let name = att.name.clone();
                state.engine.attach(att);
                state.notify(format!("Attached {}", name));
            }
            Err(e) => state.notify(e.to_string()),
        },
        SlashCommand::Detach(None) => {
            state.engine.clear_attachments();
            state.notify("Attachments cleared");
        }
        SlashCommand::Detach(Some(n)) => match state.engine.detach(n - 1) {
            Some(att) => state.notify(format!("Removed {}", att.name)),
            None => state.notify(format!("no attachment {}", n)),
        },
        SlashCommand::Mode(mode) => {
            state.notify(format!("Mode: {}", mode));
            state.mode = mode;
        }
        SlashCommand::Provider(provider) => {
            state.engine.settings_mut().set_provider(provider);
            let model = state.engine.settings().active().model.clone();
            state.notify(format!("Provider: {} ({})", provider, model));
        }
        SlashCommand::Model(Some(id)) => {
            let result = if models::find_model(&id).is_some() {
                state.engine.settings_mut().set_model(&id)
            } else {
                state.engine.settings_mut().set_custom_model(&id)
            };
            match result {
                Ok(()) => state.notify(format!("Model: {}", id)),
                Err(e) => state.notify(e.to_string()),
            }
        }
        SlashCommand::Model(None) => {
            if let Some(id) = run_picker(terminal)? {
                match state.engine.settings_mut().set_model(id) {
                    Ok(()) => state.notify(format!("Model: {}", id)),
                    Err(e) => state.notify(e.to_string()),
                }
            }
        }
        SlashCommand::Temperature(t) => match state.engine.settings_mut().set_temperature(t) {
            Ok(()) => state.notify(format!("Temperature: {}", t)),
            Err(e) => state.notify(e.to_string()),
        },
        SlashCommand::MaxTokens(n) => match state.engine.settings_mut().set_max_tokens(n) {
            Ok(()) => state.notify(format!("Max tokens: {}", n)),
            Err(e) => state.notify(e.to_string()),
        },
        SlashCommand::Defaults => {
            state.engine.reset_settings();
            state.notify("Settings reset to defaults");
        }
        SlashCommand::History => {
            state.tab = Tab::History;
            let outcome = state.engine.history_mut().open(client).await;
            state.history_list.select(Some(0));
            report_fetch(state, &outcome);
        }
        SlashCommand::More => {
            let outcome = state.engine.history_mut().load_more(client).await;
            report_fetch(state, &outcome);
        }
        SlashCommand::Load(n) => load_history_item(state, client, n - 1).await,
        SlashCommand::User(id) => {
            let outcome = state.engine.history_mut().set_user_filter(client, Some(id.clone())).await;
            state.notify(format!("History filter: {}", id));
            report_fetch(state, &outcome);
        }
        SlashCommand::UserReset => {
            let outcome = state.engine.history_mut().clear_user_filter(client).await;
            state.notify("History filter cleared");
            report_fetch(state, &outcome);
        }
        SlashCommand::RagAdd(path) => rag_add(state, client, &path).await,
        SlashCommand::RagQuery(query) => {
            let result = state
                .engine
                .retrieval_mut()
                .retrieve(client, &query, DEFAULT_N_RESULTS)
                .await
                .map(|docs| docs.len());
            match result {
                Ok(count) => {
                    state.mode = ChatMode::Retrieval(Vec::new());
                    state.notify(format!("Retrieved {} documents; mode: rag", count));
                }
                Err(e) => state.notify(format!("Retrieval failed: {}", e)),
            }
        }
        SlashCommand::RagClear => match state.engine.retrieval_mut().delete_collection(client).await {
            Ok(()) => state.notify("Vector DB cleared"),
            Err(e) => state.notify(format!("Clear failed: {}", e)),
        },
        SlashCommand::Help => state.notify(SLASH_HELP),
        SlashCommand::Quit => state.quit = true,
    }
    Ok(())
}

async fn rag_add(state: &mut TuiState, client: &ApiClient, path: &str) {
    let path = Path::new(path);
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            state.notify(format!("Cannot read {}: {}", path.display(), e));
            return;
        }
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string());
    let kind = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "txt".to_string());

    match state
        .engine
        .retrieval_mut()
        .add_document(client, &text, name, &kind)
        .await
    {
        Ok(()) => state.notify(format!("Added {} to vector DB", path.display())),
        Err(e) => state.notify(format!("Add failed: {}", e)),
    }
}

// ═══════════════════════════════════════════════════════════════
// RENDERING
// ═══════════════════════════════════════════════════════════════

fn render_tui(f: &mut Frame, state: &TuiState) {
    let area = f.size();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header + tabs
            Constraint::Min(5),    // Main content
            Constraint::Length(3), // Input
            Constraint::Length(1), // Status
        ])
        .split(area);

    let settings = state.engine.settings().active();
    let tabs = Tabs::new(Tab::all().iter().map(|t| t.name()))
        .select(Tab::all().iter().position(|t| *t == state.tab).unwrap_or(0))
        .style(Style::default().fg(Color::White))
        .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .block(Block::default().borders(Borders::ALL).title(format!(
            "chatdeck | {} {}{}",
            settings.provider,
            settings.model,
            if state.engine.settings().is_overridden() { " (auto)" } else { "" }
        )));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        Tab::Chat => render_chat(f, state, chunks[1]),
        Tab::History => render_history(f, state, chunks[1]),
        Tab::Log => render_log(f, state, chunks[1]),
    }

    let loading = state.engine.is_loading();
    let input_style = if loading {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default()
    };
    let attachments = state.engine.attachments();
    let input_title = if loading {
        "Answering...".to_string()
    } else if attachments.is_empty() {
        "Input (Enter to send, /help)".to_string()
    } else {
        let names: Vec<&str> = attachments.iter().map(|a| a.name.as_str()).collect();
        format!("Input [{}]", names.join(", "))
    };
    let input = Paragraph::new(state.engine.input())
        .style(input_style)
        .block(Block::default().borders(Borders::ALL).title(input_title));
    f.render_widget(input, chunks[2]);

    let backend = *state.status.borrow();
    let status = format!(
        " {} {} {} | mode: {} | temp {} | max {} | session {} | {}",
        if loading { spinner_char(state.tick) } else { ' ' },
        backend.symbol(),
        backend,
        state.mode,
        settings.temperature,
        settings.max_tokens,
        short_id(&state.engine.session_id().to_string()),
        state.notice.as_deref().unwrap_or("Tab:switch Esc:quit"),
    );
    let status_style = match backend {
        BackendStatus::Offline => Style::default().fg(Color::Red),
        _ => Style::default().fg(Color::DarkGray),
    };
    f.render_widget(Paragraph::new(status).style(status_style), chunks[3]);
}

/// Transcript as display lines; an empty open reply shows `placeholder`
fn transcript_lines(messages: &[Message], placeholder: Option<char>) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for (i, msg) in messages.iter().enumerate() {
        match msg.sender {
            Sender::User => {
                let style = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
                let mut text_lines = msg.text.lines();
                let first = text_lines.next().unwrap_or("");
                lines.push(Line::styled(format!("> {}", first), style));
                for l in text_lines {
                    lines.push(Line::styled(format!("  {}", l), style));
                }
                for att in &msg.attachments {
                    let kind = if att.is_image() { "image" } else { "file" };
                    lines.push(Line::styled(
                        format!("  [{}: {}]", kind, att.name),
                        Style::default().fg(Color::DarkGray),
                    ));
                }
            }
            Sender::Assistant => {
                let is_last = i + 1 == messages.len();
                if msg.text.is_empty() {
                    if let (true, Some(c)) = (is_last, placeholder) {
                        lines.push(Line::raw(format!("{}", c)));
                    }
                }
                for l in msg.text.lines() {
                    lines.push(Line::raw(l.to_string()));
                }
            }
        }
        lines.push(Line::raw(""));
    }
    lines
}

fn render_chat(f: &mut Frame, state: &TuiState, area: Rect) {
    let placeholder = state.engine.is_loading().then(|| spinner_char(state.tick));
    let lines = transcript_lines(state.engine.transcript().messages(), placeholder);

    // Keep the newest lines in view
    let height = area.height.saturating_sub(2) as usize;
    let skip = lines.len().saturating_sub(height);
    let visible: Vec<Line> = lines.into_iter().skip(skip).collect();

    let para = Paragraph::new(visible)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Chat"));
    f.render_widget(para, area);
}

fn render_history(f: &mut Frame, state: &TuiState, area: Rect) {
    let history = state.engine.history();
    let items: Vec<ListItem> = history
        .items()
        .iter()
        .enumerate()
        .map(|(i, item)| {
            ListItem::new(format!(
                "{:>3}. {}  {}",
                i + 1,
                item.date_label,
                item.last_message_preview
            ))
        })
        .collect();

    let title = format!(
        "History ({}{}) user: {} | Enter:load m:more r:reload",
        history.items().len(),
        if history.has_more() { "+" } else { "" },
        history.user_filter().unwrap_or("all"),
    );
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    let mut list_state = state.history_list.clone();
    f.render_stateful_widget(list, area, &mut list_state);
}

fn render_log(f: &mut Frame, state: &TuiState, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);

    let text: String = state.log.iter().rev().take(50).cloned().collect::<Vec<_>>().join("\n");
    let para = Paragraph::new(text)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Session"));
    f.render_widget(para, chunks[0]);

    // Newest lines at the bottom, like the file itself
    let visible = chunks[1].height.saturating_sub(2) as usize;
    let start = state.file_log.len().saturating_sub(visible);
    let title = state
        .log_file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| logging::LOG_FILE.to_string());
    let file = Paragraph::new(state.file_log[start..].join("\n"))
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(file, chunks[1]);
}

fn spinner_char(tick: usize) -> char {
    const SPINNER: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
    SPINNER[tick % SPINNER.len()]
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

// ═══════════════════════════════════════════════════════════════
// TERMINAL SETUP
// ═══════════════════════════════════════════════════════════════

fn setup_terminal() -> Result<Term> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(mut terminal: Term) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(parse_slash("hello /new"), None);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_slash("/new"), Some(Ok(SlashCommand::New)));
        assert_eq!(
            parse_slash("/attach ./a b.png"),
            Some(Ok(SlashCommand::Attach("./a b.png".into())))
        );
        assert_eq!(parse_slash("/detach"), Some(Ok(SlashCommand::Detach(None))));
        assert_eq!(parse_slash("/detach 2"), Some(Ok(SlashCommand::Detach(Some(2)))));
        assert_eq!(parse_slash("/mode search"), Some(Ok(SlashCommand::Mode(ChatMode::Search))));
        assert_eq!(
            parse_slash("/provider gemini"),
            Some(Ok(SlashCommand::Provider(Provider::Gemini)))
        );
        assert_eq!(parse_slash("/model"), Some(Ok(SlashCommand::Model(None))));
        assert_eq!(parse_slash("/temp 0.2"), Some(Ok(SlashCommand::Temperature(0.2))));
        assert_eq!(parse_slash("/load 3"), Some(Ok(SlashCommand::Load(3))));
        assert_eq!(parse_slash("/user-reset"), Some(Ok(SlashCommand::UserReset)));
        assert_eq!(parse_slash("/defaults"), Some(Ok(SlashCommand::Defaults)));
        assert_eq!(
            parse_slash("/rag query what is rust"),
            Some(Ok(SlashCommand::RagQuery("what is rust".into())))
        );
        assert_eq!(parse_slash("/rag clear"), Some(Ok(SlashCommand::RagClear)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_slash("/attach"), Some(Err(_))));
        assert!(matches!(parse_slash("/load 0"), Some(Err(_))));
        assert!(matches!(parse_slash("/tokens many"), Some(Err(_))));
        assert!(matches!(parse_slash("/rag"), Some(Err(_))));
        assert!(matches!(parse_slash("/dance"), Some(Err(_))));
    }

    #[test]
    fn test_transcript_lines_placeholder_only_on_open_tail() {
        let messages = vec![
            Message::user("1", "hi\nthere"),
            Message::assistant("1-assistant", ""),
        ];
        let lines = transcript_lines(&messages, Some('*'));
        let text: Vec<String> = lines
            .iter()
            .map(|l| l.spans.iter().map(|s| s.content.as_ref()).collect())
            .collect();
        assert_eq!(text, vec!["> hi", "  there", "", "*", ""]);

        let lines = transcript_lines(&messages, None);
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
