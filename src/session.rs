//! Active conversation: identity, transcript, settings
//!
//! Exactly one session is active. "New chat" and loading a stored session both
//! supersede it; the settings carry over.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::settings::SettingsContext;
use crate::transcript::{Message, Transcript};
use crate::transport::ContextTurn;

/// Active session
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    pub transcript: Transcript,
    pub settings: SettingsContext,
}

impl Session {
    pub fn new(settings: SettingsContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            transcript: Transcript::new(),
            settings,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Start over with a fresh id and an empty transcript
    pub fn reset(&mut self) {
        self.id = Uuid::new_v4();
        self.transcript.reset();
    }

    /// Adopt a stored conversation
    pub fn replace(&mut self, id: Uuid, messages: Vec<Message>) {
        self.id = id;
        self.transcript = Transcript::from_messages(messages);
    }

    /// Prior conversation as request context. Each user message anchors a
    /// turn; its reply is the message right after it, if that one is from the
    /// assistant.
    pub fn context_turns(&self) -> Vec<ContextTurn> {
        let messages = self.transcript.messages();
        messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_user())
            .map(|(i, user)| {
                let reply = messages
                    .get(i + 1)
                    .filter(|next| !next.is_user())
                    .map(|next| next.text.clone())
                    .unwrap_or_default();
                ContextTurn {
                    user_message: user.text.clone(),
                    assistant_message: reply,
                    file_content: user.source_document.clone().unwrap_or_default(),
                }
            })
            .collect()
    }
}

static MESSAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Message id: millisecond timestamp plus a process-wide sequence so ids
/// created in the same millisecond stay distinct
pub fn next_message_id() -> String {
    let seq = MESSAGE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", Utc::now().timestamp_millis(), seq)
}
