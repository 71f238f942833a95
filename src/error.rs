//! Library error type
//!
//! The binary wraps these in `anyhow`; the engine turns transport failures
//! into inline transcript text instead of returning them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Nothing to send: blank text, no attachments, no retrieved documents
    #[error("nothing to send")]
    EmptySubmission,

    /// A stream is already open for this session
    #[error("a response is still streaming")]
    Busy,

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("no active session")]
    NoSession,

    #[error("attachment rejected: {0}")]
    Attachment(String),
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Decode(err.to_string())
    }
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;
