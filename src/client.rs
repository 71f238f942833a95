//! Backend HTTP client with chunked streaming
//!
//! Streaming replies are plain text bodies ended by connection close; bytes
//! are decoded incrementally so split code points never reach the transcript.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::history::{HistoryQuery, HistoryResponse, HistorySource, HistoryTurn};
use crate::retrieval::{AddDocument, RetrievedDocument, VectorStore};
use crate::transport::{ChatBackend, ChatReply, ChatRequest, StreamEvent, Utf8Decoder};

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Connect timeout; streams themselves are bounded by the engine's idle timeout
const CONNECT_TIMEOUT_SECS: u64 = 10;
/// Health probes should answer quickly
const HEALTH_TIMEOUT_SECS: u64 = 5;
/// Events buffered between the reader task and the engine
const STREAM_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check connectivity to the backend
    pub async fn check_health(&self) -> Result<HealthResponse> {
        let response = self
            .http
            .get(self.url("/health"))
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }
}

/// Turn a non-2xx response into `ChatError::Status`, keeping the body
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ChatError::Status {
        status: status.as_u16(),
        body,
    })
}

// ═══════════════════════════════════════════════════════════════
// Chat
// ═══════════════════════════════════════════════════════════════

#[async_trait]
impl ChatBackend for ApiClient {
    async fn open_stream(&self, mut request: ChatRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        request.stream = true;

        let http = self.http.clone();
        let url = self.url("/chat");

        tokio::spawn(async move {
            let event = match do_stream(&http, &url, &request, &tx).await {
                Ok(full_text) => StreamEvent::Complete(full_text),
                Err(e) => {
                    warn!(error = %e, "chat stream failed");
                    StreamEvent::Error(e.to_string())
                }
            };
            let _ = tx.send(event).await;
        });

        rx
    }

    async fn send_message(&self, mut request: ChatRequest) -> Result<ChatReply> {
        request.stream = false;
        let response = self
            .http
            .post(self.url("/chat"))
            .json(&request)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }
}

/// Read the body to the end, forwarding decoded text as it arrives.
/// Returns everything forwarded.
async fn do_stream(
    http: &reqwest::Client,
    url: &str,
    request: &ChatRequest,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<String> {
    debug!(session = %request.session_id, model = %request.model, "opening chat stream");

    let response = http.post(url).json(request).send().await?;
    let response = ensure_success(response).await?;

    let mut full_text = String::new();
    let mut decoder = Utf8Decoder::new();
    let mut bytes_stream = response.bytes_stream();

    while let Some(chunk) = bytes_stream.next().await {
        let chunk = chunk?;
        let text = decoder.push(&chunk);
        if text.is_empty() {
            continue;
        }
        full_text.push_str(&text);
        if tx.send(StreamEvent::Chunk(text)).await.is_err() {
            debug!("stream receiver dropped; abandoning response");
            return Ok(full_text);
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        full_text.push_str(&tail);
        let _ = tx.send(StreamEvent::Chunk(tail)).await;
    }

    debug!(bytes = full_text.len(), "chat stream closed");
    Ok(full_text)
}

// ═══════════════════════════════════════════════════════════════
// History
// ═══════════════════════════════════════════════════════════════

#[async_trait]
impl HistorySource for ApiClient {
    async fn fetch_history(&self, query: &HistoryQuery) -> Result<HistoryResponse> {
        let mut params = vec![
            ("skip", query.skip.to_string()),
            ("limit", query.limit.to_string()),
        ];
        if let Some(user) = &query.user_id {
            params.push(("user_id", user.clone()));
        }

        let response = self
            .http
            .get(self.url("/history"))
            .query(&params)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }

    async fn fetch_session(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<Vec<HistoryTurn>> {
        let mut request = self
            .http
            .get(self.url(&format!("/history/session/{}", session_id)));
        if let Some(user) = user_id {
            request = request.query(&[("user_id", user)]);
        }
        let response = ensure_success(request.send().await?).await?;
        Ok(response.json().await?)
    }
}

// ═══════════════════════════════════════════════════════════════
// Vector DB
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct VectorDbStatus {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

/// The vector DB reports failures in-band as `{"status":"error"}`
fn check_vector_status(status: Option<&str>, message: Option<&str>) -> Result<()> {
    if status == Some("error") {
        return Err(ChatError::Decode(format!(
            "vector db error: {}",
            message.unwrap_or("unknown")
        )));
    }
    Ok(())
}

impl ApiClient {
    async fn vector_call(&self, request: reqwest::RequestBuilder) -> Result<()> {
        let response = ensure_success(request.send().await?).await?;
        let body: VectorDbStatus = response.json().await?;
        check_vector_status(body.status.as_deref(), body.message.as_deref())
    }
}

#[async_trait]
impl VectorStore for ApiClient {
    async fn init(&self, session_id: Uuid) -> Result<()> {
        let request = self
            .http
            .post(self.url("/vectordb/init"))
            .query(&[("session_id", session_id.to_string())]);
        self.vector_call(request).await
    }

    async fn add(&self, document: &AddDocument) -> Result<()> {
        let request = self.http.post(self.url("/vectordb/add")).json(document);
        self.vector_call(request).await
    }

    async fn retrieve(
        &self,
        session_id: Uuid,
        query: &str,
        n_results: usize,
    ) -> Result<Vec<RetrievedDocument>> {
        let response = self
            .http
            .get(self.url("/vectordb/retrieve"))
            .query(&[
                ("session_id", session_id.to_string()),
                ("query", query.to_string()),
                ("n_results", n_results.to_string()),
            ])
            .send()
            .await?;
        let body: RetrieveResponse = ensure_success(response).await?.json().await?;
        check_vector_status(body.status.as_deref(), body.message.as_deref())?;
        Ok(body
            .results
            .into_iter()
            .filter_map(RetrievedDocument::from_value)
            .collect())
    }

    async fn delete(&self, session_id: Uuid) -> Result<()> {
        let request = self
            .http
            .delete(self.url("/vectordb/delete"))
            .query(&[("session_id", session_id.to_string())]);
        self.vector_call(request).await
    }
}
