//! Chat engine: the streaming session state machine
//!
//! A submit snapshots the input, appends the user message and an open
//! assistant placeholder, then folds stream events into that placeholder until
//! a terminal event arrives. Only one stream may be open; a second submit while
//! loading is rejected.
//!
//! The step-wise API (`begin_submit` + `apply`) lets a UI loop pump events
//! itself; `submit` drives the same steps to completion.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::attachment::{self, Attachment};
use crate::error::{ChatError, Result};
use crate::history::{self, HistoryPaginator, HistorySource};
use crate::retrieval::{RetrievalPanel, RetrievedDocument};
use crate::session::{next_message_id, Session};
use crate::settings::{Notice, Settings, SettingsContext};
use crate::transcript::{Message, Transcript};
use crate::transport::{ChatBackend, ChatRequest, ImagePayload, StreamEvent};

/// Marks failure text appended to a partially streamed reply
pub const ERROR_MARKER: &str = "[error]";
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const CLOSED_EARLY: &str = "stream closed unexpectedly";

// ═══════════════════════════════════════════════════════════════
// Modes
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChatMode {
    /// No instruction prefix
    #[default]
    Plain,
    Chat,
    Search,
    Summary,
    /// Answer from pre-fetched documents
    Retrieval(Vec<String>),
}

impl ChatMode {
    pub fn from_documents(docs: &[RetrievedDocument]) -> Self {
        ChatMode::Retrieval(docs.iter().map(|d| d.content.clone()).collect())
    }

    pub fn has_documents(&self) -> bool {
        matches!(self, ChatMode::Retrieval(docs) if !docs.is_empty())
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChatMode::Plain => "plain",
            ChatMode::Chat => "chat",
            ChatMode::Search => "search",
            ChatMode::Summary => "summary",
            ChatMode::Retrieval(_) => "rag",
        }
    }

    /// Text sent as the request's `prompt`
    pub fn instruction(&self) -> String {
        match self {
            ChatMode::Plain => String::new(),
            ChatMode::Chat => {
                "Please answer the following question in a professional and friendly manner:".into()
            }
            ChatMode::Search => "Please search for relevant information about the following:".into(),
            ChatMode::Summary => "Please summarize the key points of the following content:".into(),
            ChatMode::Retrieval(docs) => {
                let mut out =
                    String::from("Answer using the reference documents below when they are relevant.\n");
                for (i, doc) in docs.iter().enumerate() {
                    out.push_str(&format!("\n[{}] {}\n", i + 1, doc.trim()));
                }
                out
            }
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChatMode {
    type Err = ChatError;

    /// Retrieval needs documents, so "rag" parses to an empty retrieval mode
    /// that the caller fills from the retrieval panel
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "plain" => Ok(ChatMode::Plain),
            "chat" => Ok(ChatMode::Chat),
            "search" => Ok(ChatMode::Search),
            "summary" => Ok(ChatMode::Summary),
            "rag" | "retrieval" => Ok(ChatMode::Retrieval(Vec::new())),
            other => Err(ChatError::InvalidSetting(format!("unknown mode '{}'", other))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed(String),
}

/// Request built by `begin_submit`, ready for the transport
#[derive(Debug, Clone)]
pub struct PreparedSubmit {
    pub request: ChatRequest,
    pub assistant_id: String,
}

#[derive(Debug)]
struct OpenStream {
    assistant_id: String,
    had_attachments: bool,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub user_id: String,
    pub settings: Settings,
    pub history_page_size: usize,
    pub max_loaded_pages: usize,
    pub idle_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            user_id: Uuid::new_v4().to_string(),
            settings: Settings::default(),
            history_page_size: history::DEFAULT_PAGE_SIZE,
            max_loaded_pages: history::DEFAULT_MAX_LOADED_PAGES,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

pub struct ChatEngine {
    session: Session,
    history: HistoryPaginator,
    retrieval: RetrievalPanel,
    user_id: String,
    input: String,
    attachments: Vec<Attachment>,
    open: Option<OpenStream>,
    idle_timeout: Duration,
    notices: VecDeque<Notice>,
}

impl ChatEngine {
    pub fn new(options: EngineOptions) -> Self {
        let session = Session::new(SettingsContext::new(options.settings));
        let mut retrieval = RetrievalPanel::new();
        retrieval.bind_session(session.id());

        Self {
            session,
            history: HistoryPaginator::new(
                options.history_page_size,
                options.max_loaded_pages,
                Some(options.user_id.clone()),
            ),
            retrieval,
            user_id: options.user_id,
            input: String::new(),
            attachments: Vec::new(),
            open: None,
            idle_timeout: options.idle_timeout,
            notices: VecDeque::new(),
        }
    }

    // ── accessors ──────────────────────────────────────────────

    pub fn session_id(&self) -> Uuid {
        self.session.id()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.session.transcript
    }

    pub fn settings(&self) -> &SettingsContext {
        &self.session.settings
    }

    pub fn settings_mut(&mut self) -> &mut SettingsContext {
        &mut self.session.settings
    }

    pub fn history(&self) -> &HistoryPaginator {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistoryPaginator {
        &mut self.history
    }

    pub fn retrieval(&self) -> &RetrievalPanel {
        &self.retrieval
    }

    pub fn retrieval_mut(&mut self) -> &mut RetrievalPanel {
        &mut self.retrieval
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn is_loading(&self) -> bool {
        self.open.is_some()
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    pub fn input_mut(&mut self) -> &mut String {
        &mut self.input
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    fn notify(&mut self, notice: Option<Notice>) {
        if let Some(n) = notice {
            self.notices.push_back(n);
        }
    }

    // ── attachments ────────────────────────────────────────────

    pub fn attach(&mut self, attachment: Attachment) {
        debug!(name = %attachment.name, mime = %attachment.mime_type, "attachment added");
        self.attachments.push(attachment);
        let needs = attachment::needs_images(&self.attachments);
        let notice = self.session.settings.require_capability(needs);
        self.notify(notice);
    }

    pub fn detach(&mut self, index: usize) -> Option<Attachment> {
        if index >= self.attachments.len() {
            return None;
        }
        let removed = self.attachments.remove(index);
        self.restore_if_no_images();
        Some(removed)
    }

    pub fn clear_attachments(&mut self) {
        self.attachments.clear();
        self.restore_if_no_images();
    }

    /// Default settings, re-applying the image switch if images are still attached
    pub fn reset_settings(&mut self) {
        self.session.settings.reset_to_defaults();
        let needs = attachment::needs_images(&self.attachments);
        let notice = self.session.settings.require_capability(needs);
        self.notify(notice);
    }

    fn restore_if_no_images(&mut self) {
        if !attachment::needs_images(&self.attachments) {
            let notice = self.session.settings.restore();
            self.notify(notice);
        }
    }

    // ── submit ─────────────────────────────────────────────────

    /// Validate, build the request and open the assistant placeholder.
    /// No transcript change happens on error.
    pub fn begin_submit(&mut self, mode: ChatMode) -> Result<PreparedSubmit> {
        if self.is_loading() {
            return Err(ChatError::Busy);
        }
        let text = self.input.trim().to_string();
        if text.is_empty() && self.attachments.is_empty() && !mode.has_documents() {
            return Err(ChatError::EmptySubmission);
        }

        let attachments = std::mem::take(&mut self.attachments);
        let had_attachments = !attachments.is_empty();

        let source_document = source_document(&attachments);
        let body = match &source_document {
            Some(doc) if text.is_empty() => doc.clone(),
            Some(doc) => format!("{}\n\n{}", text, doc),
            None => text.clone(),
        };
        let images = attachments
            .iter()
            .filter(|a| a.is_image())
            .map(|a| ImagePayload {
                name: a.name.clone(),
                mime_type: a.mime_type.clone(),
                data: a.data_url(),
            })
            .collect();

        let settings = self.session.settings.for_request();
        let request = ChatRequest {
            session_id: self.session.id(),
            prompt: mode.instruction(),
            message: body,
            context: self.session.context_turns(),
            model: settings.model,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            api_type: settings.provider,
            user_id: self.user_id.clone(),
            images,
            stream: true,
        };

        let message_id = next_message_id();
        let assistant_id = format!("{}-assistant", message_id);
        self.session.transcript.append(
            Message::user(message_id, text)
                .with_attachments(attachments)
                .with_source_document(source_document),
        );
        self.session.transcript.open_assistant(assistant_id.clone());
        self.input.clear();
        self.open = Some(OpenStream {
            assistant_id: assistant_id.clone(),
            had_attachments,
        });

        info!(
            session = %self.session.id(),
            mode = %mode,
            model = %request.model,
            provider = %request.api_type,
            context_turns = request.context.len(),
            "submitting message"
        );

        Ok(PreparedSubmit {
            request,
            assistant_id,
        })
    }

    /// Fold one stream event into the open reply. Returns the outcome once a
    /// terminal event closes the stream; events with no open stream are dropped.
    pub fn apply(&mut self, event: StreamEvent) -> Option<StreamOutcome> {
        if self.open.is_none() {
            debug!(?event, "dropping event with no open stream");
            return None;
        }

        match event {
            StreamEvent::Chunk(text) => {
                self.session.transcript.append_to_open(&text);
                None
            }
            StreamEvent::Error(reason) => {
                let marker = format!("\n\n{} {}", ERROR_MARKER, reason);
                self.session.transcript.append_to_open(&marker);
                self.notify(Some(Notice(format!("request failed: {}", reason))));
                Some(self.finish(StreamOutcome::Failed(reason)))
            }
            StreamEvent::Complete(_) => Some(self.finish(StreamOutcome::Completed)),
        }
    }

    fn finish(&mut self, outcome: StreamOutcome) -> StreamOutcome {
        self.session.transcript.close_tail();
        let Some(stream) = self.open.take() else {
            return outcome;
        };

        match &outcome {
            StreamOutcome::Completed => debug!(id = %stream.assistant_id, "reply complete"),
            StreamOutcome::Failed(reason) => {
                warn!(id = %stream.assistant_id, %reason, "reply failed")
            }
        }

        if stream.had_attachments {
            let notice = self.session.settings.restore();
            self.notify(notice);
            // Images attached while the reply streamed still need a capable provider
            let needs = attachment::needs_images(&self.attachments);
            let notice = self.session.settings.require_capability(needs);
            self.notify(notice);
        }
        outcome
    }

    /// Pump events from `rx` until the stream ends. A silent stream past the
    /// idle timeout, or a channel closed without a terminal event, fails it.
    pub async fn drive(&mut self, rx: &mut mpsc::Receiver<StreamEvent>) -> StreamOutcome {
        self.drive_with(rx, |_| {}).await
    }

    /// `drive`, also handing each chunk to `on_chunk` as it is applied
    pub async fn drive_with<F>(
        &mut self,
        rx: &mut mpsc::Receiver<StreamEvent>,
        mut on_chunk: F,
    ) -> StreamOutcome
    where
        F: FnMut(&str),
    {
        loop {
            let event = match tokio::time::timeout(self.idle_timeout, rx.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => StreamEvent::Error(CLOSED_EARLY.into()),
                Err(_) => StreamEvent::Error(format!(
                    "no response for {}s",
                    self.idle_timeout.as_secs()
                )),
            };
            if let StreamEvent::Chunk(text) = &event {
                if self.is_loading() {
                    on_chunk(text);
                }
            }
            if let Some(outcome) = self.apply(event) {
                return outcome;
            }
            if !self.is_loading() {
                return StreamOutcome::Failed("stream already closed".into());
            }
        }
    }

    /// Apply whatever is already queued on `rx` without waiting
    pub fn pump(&mut self, rx: &mut mpsc::Receiver<StreamEvent>) -> Option<StreamOutcome> {
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    if let Some(outcome) = self.apply(event) {
                        return Some(outcome);
                    }
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    return self.apply(StreamEvent::Error(CLOSED_EARLY.into()))
                }
            }
        }
    }

    /// Fail the open stream from outside, e.g. when a caller's own idle
    /// timer fires
    pub fn fail_stream(&mut self, reason: impl Into<String>) -> Option<StreamOutcome> {
        self.apply(StreamEvent::Error(reason.into()))
    }

    /// Submit the current input and stream the reply to completion
    pub async fn submit(
        &mut self,
        backend: &dyn ChatBackend,
        mode: ChatMode,
    ) -> Result<StreamOutcome> {
        let prepared = self.begin_submit(mode)?;
        let mut rx = backend.open_stream(prepared.request).await;
        Ok(self.drive(&mut rx).await)
    }

    /// Submit without streaming: the whole reply lands as one chunk
    pub async fn submit_whole(
        &mut self,
        backend: &dyn ChatBackend,
        mode: ChatMode,
    ) -> Result<StreamOutcome> {
        let prepared = self.begin_submit(mode)?;
        let event = match backend.send_message(prepared.request).await {
            Ok(reply) => {
                self.apply(StreamEvent::Chunk(reply.message.clone()));
                StreamEvent::Complete(reply.message)
            }
            Err(e) => StreamEvent::Error(e.to_string()),
        };
        Ok(self
            .apply(event)
            .unwrap_or_else(|| StreamOutcome::Failed("stream already closed".into())))
    }

    // ── session switching ──────────────────────────────────────

    /// Start a fresh conversation. Settings and pending input stay.
    pub fn new_chat(&mut self) -> Result<()> {
        if self.is_loading() {
            return Err(ChatError::Busy);
        }
        self.session.reset();
        self.history.reset();
        self.retrieval.bind_session(self.session.id());
        info!(session = %self.session.id(), "new chat");
        Ok(())
    }

    /// Replace the conversation with a stored session
    pub async fn load_session(
        &mut self,
        source: &dyn HistorySource,
        session_id: &str,
    ) -> Result<usize> {
        if self.is_loading() {
            return Err(ChatError::Busy);
        }
        let id = Uuid::parse_str(session_id)
            .map_err(|e| ChatError::Decode(format!("session id '{}': {}", session_id, e)))?;

        let turns = source
            .fetch_session(session_id, self.history.user_filter())
            .await?;
        let messages = history::turns_to_messages(&turns);
        let count = messages.len();

        self.session.replace(id, messages);
        self.retrieval.bind_session(id);
        info!(session = %id, messages = count, "loaded session");
        Ok(count)
    }
}

/// Text of document attachments, one section per file
fn source_document(attachments: &[Attachment]) -> Option<String> {
    let sections: Vec<String> = attachments
        .iter()
        .filter_map(|a| a.text.as_ref().map(|t| format!("--- {} ---\n{}", a.name, t)))
        .collect();
    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provider;
    use crate::transcript::Sender;
    use crate::transport::ChatReply;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays a fixed event script for every request
    #[derive(Default)]
    struct ScriptedBackend {
        script: Vec<StreamEvent>,
        /// Keep the channel open after the script (simulates a hung stream)
        hang: bool,
        requests: Mutex<Vec<ChatRequest>>,
        held: Mutex<Vec<mpsc::Sender<StreamEvent>>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<StreamEvent>) -> Self {
            Self {
                script,
                ..Default::default()
            }
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn open_stream(&self, request: ChatRequest) -> mpsc::Receiver<StreamEvent> {
            self.requests.lock().unwrap().push(request);
            let (tx, rx) = mpsc::channel(self.script.len() + 1);
            for event in &self.script {
                tx.try_send(event.clone()).unwrap();
            }
            if self.hang {
                self.held.lock().unwrap().push(tx);
            }
            rx
        }

        async fn send_message(&self, request: ChatRequest) -> Result<ChatReply> {
            self.requests.lock().unwrap().push(request);
            Ok(ChatReply {
                id: serde_json::json!(1),
                message: "whole reply".into(),
                timestamp: "2024-01-01T00:00:00".into(),
            })
        }
    }

    fn chunk(s: &str) -> StreamEvent {
        StreamEvent::Chunk(s.into())
    }

    fn engine() -> ChatEngine {
        ChatEngine::new(EngineOptions {
            user_id: "user-1".into(),
            ..Default::default()
        })
    }

    fn image() -> Attachment {
        Attachment::from_bytes("photo.jpg", &[0xff, 0xd8, 0xff], "photo.jpg".into())
    }

    #[test]
    fn test_hello_scenario_step_by_step() {
        let mut engine = engine();
        engine.set_input("Hello");
        engine.begin_submit(ChatMode::Plain).unwrap();

        let messages = engine.transcript().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[0].text, "Hello");
        assert_eq!(messages[1].sender, Sender::Assistant);
        assert_eq!(messages[1].text, "");
        assert!(engine.is_loading());
        assert_eq!(engine.input(), "");

        assert_eq!(engine.apply(chunk("Hi")), None);
        assert_eq!(engine.apply(chunk(" there")), None);
        assert_eq!(
            engine.apply(StreamEvent::Complete("Hi there".into())),
            Some(StreamOutcome::Completed)
        );

        assert_eq!(engine.transcript().messages()[1].text, "Hi there");
        assert!(!engine.is_loading());
        assert!(!engine.transcript().is_tail_open());
    }

    #[test]
    fn test_text_is_concatenation_of_chunks() {
        let chunks = ["Th", "e qu", "i", "ck ", "", "brown 🦊", " fox"];
        let mut engine = engine();
        engine.set_input("go");
        engine.begin_submit(ChatMode::Plain).unwrap();
        for c in chunks {
            engine.apply(chunk(c));
        }
        engine.apply(StreamEvent::Complete(String::new()));
        assert_eq!(engine.transcript().last().unwrap().text, chunks.concat());
    }

    #[test]
    fn test_error_keeps_partial_output() {
        let mut engine = engine();
        engine.set_input("Explain");
        engine.begin_submit(ChatMode::Plain).unwrap();
        engine.apply(chunk("Partial answer"));
        let outcome = engine.apply(StreamEvent::Error("connection reset".into()));

        assert_eq!(outcome, Some(StreamOutcome::Failed("connection reset".into())));
        let text = &engine.transcript().last().unwrap().text;
        assert!(text.starts_with("Partial answer"));
        assert!(text.contains(ERROR_MARKER));
        assert!(text.contains("connection reset"));
        assert!(!engine.is_loading());
    }

    #[test]
    fn test_events_after_terminal_are_ignored() {
        let mut engine = engine();
        engine.set_input("q");
        engine.begin_submit(ChatMode::Plain).unwrap();
        engine.apply(chunk("a"));
        engine.apply(StreamEvent::Complete("a".into()));
        assert_eq!(engine.apply(chunk("late")), None);
        assert_eq!(engine.apply(StreamEvent::Error("late".into())), None);
        assert_eq!(engine.transcript().last().unwrap().text, "a");
    }

    #[test]
    fn test_validation_rejects_empty_and_busy() {
        let mut engine = engine();
        engine.set_input("   \n");
        assert!(matches!(
            engine.begin_submit(ChatMode::Chat),
            Err(ChatError::EmptySubmission)
        ));
        assert!(engine.transcript().is_empty());

        // Empty text is fine when documents were retrieved
        engine.set_input("");
        engine
            .begin_submit(ChatMode::Retrieval(vec!["doc".into()]))
            .unwrap();

        engine.set_input("again");
        assert!(matches!(
            engine.begin_submit(ChatMode::Plain),
            Err(ChatError::Busy)
        ));
        assert_eq!(engine.transcript().len(), 2);
        assert_eq!(engine.input(), "again");
    }

    #[test]
    fn test_request_carries_context_settings_and_mode() {
        let mut engine = engine();
        engine.set_input("first");
        engine.begin_submit(ChatMode::Plain).unwrap();
        engine.apply(chunk("reply one"));
        engine.apply(StreamEvent::Complete(String::new()));

        engine.settings_mut().set_temperature(1.2).unwrap();
        engine.set_input("second");
        let prepared = engine.begin_submit(ChatMode::Summary).unwrap();
        let req = prepared.request;

        assert_eq!(req.message, "second");
        assert_eq!(req.context.len(), 1);
        assert_eq!(req.context[0].user_message, "first");
        assert_eq!(req.context[0].assistant_message, "reply one");
        assert_eq!(req.temperature, 1.2);
        assert_eq!(req.api_type, Provider::OpenRouter);
        assert_eq!(req.user_id, "user-1");
        assert_eq!(req.session_id, engine.session_id());
        assert!(req.prompt.starts_with("Please summarize"));
        assert_eq!(engine.transcript().last().unwrap().id, prepared.assistant_id);
    }

    #[test]
    fn test_document_attachment_becomes_source_document() {
        let mut engine = engine();
        engine.attach(Attachment::from_bytes("notes.md", b"remember this", "notes.md".into()));
        engine.set_input("summarize");
        let req = engine.begin_submit(ChatMode::Plain).unwrap().request;

        assert!(req.message.starts_with("summarize\n\n--- notes.md ---"));
        assert!(req.images.is_empty());
        let user = &engine.transcript().messages()[0];
        assert_eq!(user.attachments.len(), 1);
        assert!(user.source_document.as_deref().unwrap().contains("remember this"));
        assert!(engine.attachments().is_empty());
    }

    #[test]
    fn test_image_auto_switch_on_attach_and_detach() {
        let mut engine = engine();
        assert_eq!(engine.settings().active().provider, Provider::OpenRouter);

        engine.attach(image());
        assert_eq!(engine.settings().active().provider, Provider::OpenAi);
        assert!(engine.settings().is_overridden());
        assert_eq!(engine.take_notices().len(), 1);

        engine.detach(0);
        assert_eq!(engine.settings().active().provider, Provider::OpenRouter);
        assert_eq!(engine.settings().active().model, "deepseek/deepseek-r1:free");
        assert!(!engine.settings().is_overridden());
    }

    #[test]
    fn test_image_send_restores_after_completion() {
        let mut engine = engine();
        engine.attach(image());
        engine.set_input("what is this?");
        let req = engine.begin_submit(ChatMode::Plain).unwrap().request;

        assert_eq!(req.api_type, Provider::OpenAi);
        assert_eq!(req.images.len(), 1);
        assert!(req.images[0].data.starts_with("data:image/jpeg;base64,"));
        // Still overridden while the reply streams
        assert_eq!(engine.settings().active().provider, Provider::OpenAi);

        engine.apply(StreamEvent::Error("boom".into()));
        assert_eq!(engine.settings().active().provider, Provider::OpenRouter);
        assert!(!engine.settings().is_overridden());
    }

    #[test]
    fn test_image_attached_during_stream_stays_switched() {
        let mut engine = engine();
        engine.attach(image());
        engine.set_input("first");
        engine.begin_submit(ChatMode::Plain).unwrap();

        engine.attach(image());
        engine.apply(StreamEvent::Complete(String::new()));
        assert_eq!(engine.settings().active().provider, Provider::OpenAi);

        engine.clear_attachments();
        assert_eq!(engine.settings().active().provider, Provider::OpenRouter);
    }

    #[test]
    fn test_reset_settings_keeps_image_switch() {
        let mut engine = engine();
        engine.settings_mut().set_provider(Provider::Gemini);
        engine.settings_mut().set_temperature(1.9).unwrap();

        engine.reset_settings();
        assert_eq!(engine.settings().active(), &Settings::default());
        assert!(engine.take_notices().is_empty());

        engine.attach(image());
        engine.take_notices();
        engine.reset_settings();
        assert_eq!(engine.settings().active().provider, Provider::OpenAi);
        assert_eq!(engine.take_notices().len(), 1);

        engine.detach(0);
        assert_eq!(engine.settings().active(), &Settings::default());
    }

    #[test]
    fn test_new_chat_resets_session() {
        let mut engine = engine();
        let before = engine.session_id();
        engine.set_input("hi");
        engine.begin_submit(ChatMode::Plain).unwrap();
        assert!(matches!(engine.new_chat(), Err(ChatError::Busy)));

        engine.apply(StreamEvent::Complete(String::new()));
        engine.new_chat().unwrap();
        assert!(engine.transcript().is_empty());
        assert_ne!(engine.session_id(), before);
        assert_eq!(engine.retrieval().session_id(), Some(engine.session_id()));
    }

    #[tokio::test]
    async fn test_submit_drives_stream_to_completion() {
        let backend = ScriptedBackend::new(vec![
            chunk("Hi"),
            chunk(" there"),
            StreamEvent::Complete("Hi there".into()),
        ]);
        let mut engine = engine();
        engine.set_input("Hello");

        let outcome = engine.submit(&backend, ChatMode::Plain).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(engine.transcript().last().unwrap().text, "Hi there");
        assert!(!engine.is_loading());
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_submit_makes_no_request() {
        let backend = ScriptedBackend::new(vec![StreamEvent::Complete(String::new())]);
        let mut engine = engine();
        engine.set_input("  ");
        assert!(engine.submit(&backend, ChatMode::Plain).await.is_err());
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_channel_closed_without_terminal_fails() {
        let backend = ScriptedBackend::new(vec![chunk("half")]);
        let mut engine = engine();
        engine.set_input("q");

        let outcome = engine.submit(&backend, ChatMode::Plain).await.unwrap();
        assert!(matches!(outcome, StreamOutcome::Failed(_)));
        let text = &engine.transcript().last().unwrap().text;
        assert!(text.starts_with("half"));
        assert!(text.contains(ERROR_MARKER));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_fails_hung_stream() {
        let backend = ScriptedBackend {
            script: vec![chunk("slow")],
            hang: true,
            ..Default::default()
        };
        let mut engine = ChatEngine::new(EngineOptions {
            idle_timeout: Duration::from_secs(5),
            ..Default::default()
        });
        engine.set_input("q");

        let outcome = engine.submit(&backend, ChatMode::Plain).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Failed("no response for 5s".into()));
        assert!(!engine.is_loading());
    }

    #[tokio::test]
    async fn test_pump_applies_queued_events() {
        let backend = ScriptedBackend {
            script: vec![chunk("a"), chunk("b")],
            hang: true,
            ..Default::default()
        };
        let mut engine = engine();
        engine.set_input("q");
        let prepared = engine.begin_submit(ChatMode::Plain).unwrap();
        let mut rx = backend.open_stream(prepared.request).await;

        assert_eq!(engine.pump(&mut rx), None);
        assert_eq!(engine.transcript().last().unwrap().text, "ab");
        assert!(engine.is_loading());

        backend.held.lock().unwrap().clear();
        assert!(matches!(engine.pump(&mut rx), Some(StreamOutcome::Failed(_))));
        assert!(!engine.is_loading());
    }

    #[tokio::test]
    async fn test_submit_whole() {
        let backend = ScriptedBackend::default();
        let mut engine = engine();
        engine.set_input("q");
        let outcome = engine.submit_whole(&backend, ChatMode::Plain).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(engine.transcript().last().unwrap().text, "whole reply");
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("search".parse::<ChatMode>().unwrap(), ChatMode::Search);
        assert_eq!("".parse::<ChatMode>().unwrap(), ChatMode::Plain);
        assert!(!"rag".parse::<ChatMode>().unwrap().has_documents());
        assert!("dance".parse::<ChatMode>().is_err());
        assert!(ChatMode::Retrieval(vec!["a".into()])
            .instruction()
            .contains("[1] a"));
    }
}
