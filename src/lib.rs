//! chatdeck - streaming chat client for a RAG chat backend
//!
//! The engine owns one session: transcript, settings with the image
//! auto-switch, history pagination and the retrieval panel. The HTTP client
//! implements the backend traits the engine talks to.

pub mod attachment;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod history;
pub mod logging;
pub mod models;
pub mod retrieval;
pub mod session;
pub mod settings;
pub mod transcript;
pub mod transport;
pub mod ui;

pub use engine::{ChatEngine, ChatMode, EngineOptions, StreamOutcome};
pub use error::{ChatError, Result};
pub use transport::{ChatBackend, StreamEvent};
