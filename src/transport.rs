//! Streaming transport seam
//!
//! A reply arrives as a sequence of [`StreamEvent`]s over an mpsc channel:
//! zero or more `Chunk`s, then exactly one `Error` or `Complete`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;
use crate::models::Provider;

/// Stream events from the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A fragment of reply text; boundaries carry no meaning
    Chunk(String),
    /// Stream failed; terminal
    Error(String),
    /// Stream finished with the text the transport saw; terminal
    Complete(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk(_))
    }
}

// ═══════════════════════════════════════════════════════════════
// Wire types
// ═══════════════════════════════════════════════════════════════

/// One prior user turn and the reply that followed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTurn {
    pub user_message: String,
    pub assistant_message: String,
    pub file_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub name: String,
    pub mime_type: String,
    /// `data:<mime>;base64,<payload>`
    pub data: String,
}

/// Body of `POST /chat`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: Uuid,
    /// Mode instruction placed before the message
    pub prompt: String,
    pub message: String,
    pub context: Vec<ContextTurn>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub api_type: Provider,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImagePayload>,
    #[serde(default)]
    pub stream: bool,
}

/// Non-streaming reply of `POST /chat`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatReply {
    pub id: serde_json::Value,
    pub message: String,
    pub timestamp: String,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Start a streaming reply. Failures to connect arrive as an `Error` event.
    async fn open_stream(&self, request: ChatRequest) -> mpsc::Receiver<StreamEvent>;

    /// Whole reply in one response
    async fn send_message(&self, request: ChatRequest) -> Result<ChatReply>;
}

// ═══════════════════════════════════════════════════════════════
// Incremental UTF-8
// ═══════════════════════════════════════════════════════════════

/// Turns arbitrary byte chunks into text without splitting a code point.
/// Incomplete trailing sequences wait for the next chunk.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much as possible; may return an empty string
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Truncated sequence at the end: keep it for later
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left at end of stream
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
