//! Conversation transcript
//!
//! Append-only except for the tail: the newest assistant message stays open
//! while its reply streams in, and only that open tail may be mutated.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::attachment::Attachment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    /// RFC 3339
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_document: Option<String>,
}

impl Message {
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id.into(), text.into(), Sender::User)
    }

    pub fn assistant(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id.into(), text.into(), Sender::Assistant)
    }

    fn new(id: String, text: String, sender: Sender) -> Self {
        Self {
            id,
            text,
            sender,
            timestamp: now_rfc3339(),
            attachments: Vec::new(),
            source_document: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_source_document(mut self, document: Option<String>) -> Self {
        self.source_document = document;
        self
    }

    pub fn is_user(&self) -> bool {
        self.sender == Sender::User
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Ordered message list with at most one open assistant tail
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    tail_open: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tail_open: false,
        }
    }

    /// Append a finalized message. Closes any open tail first.
    pub fn append(&mut self, message: Message) {
        self.tail_open = false;
        self.messages.push(message);
    }

    /// Append an empty assistant message that accepts streamed text.
    /// Returns false, appending nothing, if a tail is already open.
    pub fn open_assistant(&mut self, id: impl Into<String>) -> bool {
        if self.tail_open {
            return false;
        }
        self.messages.push(Message::assistant(id, String::new()));
        self.tail_open = true;
        true
    }

    /// Apply `updater` to the last message; no-op on an empty transcript
    pub fn mutate_tail<F>(&mut self, updater: F)
    where
        F: FnOnce(&mut Message),
    {
        if let Some(last) = self.messages.last_mut() {
            updater(last);
        }
    }

    /// Concatenate onto the open tail. Returns false when nothing is open.
    pub fn append_to_open(&mut self, text: &str) -> bool {
        if !self.tail_open {
            return false;
        }
        self.mutate_tail(|m| m.text.push_str(text));
        true
    }

    pub fn close_tail(&mut self) {
        self.tail_open = false;
    }

    pub fn is_tail_open(&self) -> bool {
        self.tail_open
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.tail_open = false;
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
