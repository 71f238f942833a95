//! Retrieval panel over the backend vector DB
//!
//! Collections are per session. The panel initializes the collection lazily,
//! once per session, and keeps the last retrieved documents for the
//! retrieval chat mode.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ChatError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_N_RESULTS: usize = 5;

/// Body of `POST /vectordb/add`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddDocument {
    pub session_id: Uuid,
    pub document: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedDocument {
    pub content: String,
    pub metadata: serde_json::Value,
    pub distance: Option<f64>,
}

impl RetrievedDocument {
    /// Results come either as bare strings or as objects carrying the text
    /// under `content`, `document` or `page_content`
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(content) => Some(Self {
                content,
                metadata: serde_json::Value::Null,
                distance: None,
            }),
            serde_json::Value::Object(map) => {
                let content = ["content", "document", "page_content"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(|v| v.as_str()))?
                    .to_string();
                Some(Self {
                    content,
                    metadata: map.get("metadata").cloned().unwrap_or_default(),
                    distance: map.get("distance").and_then(|v| v.as_f64()),
                })
            }
            _ => None,
        }
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn init(&self, session_id: Uuid) -> Result<()>;
    async fn add(&self, document: &AddDocument) -> Result<()>;
    async fn retrieve(
        &self,
        session_id: Uuid,
        query: &str,
        n_results: usize,
    ) -> Result<Vec<RetrievedDocument>>;
    async fn delete(&self, session_id: Uuid) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct RetrievalPanel {
    session_id: Option<Uuid>,
    initialized: bool,
    documents: Vec<RetrievedDocument>,
}

impl RetrievalPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow the active session; a different session starts uninitialized
    pub fn bind_session(&mut self, session_id: Uuid) {
        if self.session_id != Some(session_id) {
            self.session_id = Some(session_id);
            self.initialized = false;
            self.documents.clear();
        }
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Documents from the last successful retrieval
    pub fn documents(&self) -> &[RetrievedDocument] {
        &self.documents
    }

    fn bound(&self) -> Result<Uuid> {
        self.session_id.ok_or(ChatError::NoSession)
    }

    pub async fn ensure_initialized(&mut self, store: &dyn VectorStore) -> Result<()> {
        let session_id = self.bound()?;
        if self.initialized {
            return Ok(());
        }
        info!(%session_id, "initializing vector db");
        match store.init(session_id).await {
            Ok(()) => {
                self.initialized = true;
                Ok(())
            }
            Err(e) => {
                warn!(%session_id, error = %e, "vector db init failed");
                self.initialized = false;
                Err(e)
            }
        }
    }

    pub async fn add_document(
        &mut self,
        store: &dyn VectorStore,
        text: &str,
        document_id: Option<String>,
        kind: &str,
    ) -> Result<()> {
        let session_id = self.bound()?;
        if text.trim().is_empty() {
            return Err(ChatError::EmptySubmission);
        }
        self.documents.clear();
        self.ensure_initialized(store).await?;

        let request = AddDocument {
            session_id,
            document: text.to_string(),
            document_id,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            kind: kind.to_string(),
        };
        if let Err(e) = store.add(&request).await {
            warn!(%session_id, error = %e, "adding document failed");
            return Err(e);
        }
        Ok(())
    }

    pub async fn retrieve(
        &mut self,
        store: &dyn VectorStore,
        query: &str,
        n_results: usize,
    ) -> Result<&[RetrievedDocument]> {
        let session_id = self.bound()?;
        self.documents.clear();
        if query.trim().is_empty() {
            return Err(ChatError::EmptySubmission);
        }
        self.ensure_initialized(store).await?;

        match store.retrieve(session_id, query, n_results).await {
            Ok(docs) => {
                info!(%session_id, count = docs.len(), "retrieved documents");
                self.documents = docs;
                Ok(&self.documents)
            }
            Err(e) => {
                warn!(%session_id, error = %e, "retrieval failed");
                Err(e)
            }
        }
    }

    /// Drop the session's collection. The next operation re-initializes.
    pub async fn delete_collection(&mut self, store: &dyn VectorStore) -> Result<()> {
        let session_id = self.bound()?;
        self.documents.clear();
        store.delete(session_id).await?;
        self.initialized = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        calls: Mutex<Vec<String>>,
        fail_init: bool,
    }

    impl FakeStore {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VectorStore for FakeStore {
        async fn init(&self, _: Uuid) -> Result<()> {
            self.calls.lock().unwrap().push("init".into());
            if self.fail_init {
                return Err(ChatError::Decode("vector db error: down".into()));
            }
            Ok(())
        }

        async fn add(&self, doc: &AddDocument) -> Result<()> {
            self.calls.lock().unwrap().push(format!("add:{}", doc.kind));
            Ok(())
        }

        async fn retrieve(&self, _: Uuid, query: &str, n: usize) -> Result<Vec<RetrievedDocument>> {
            self.calls.lock().unwrap().push(format!("retrieve:{}:{}", query, n));
            Ok(vec![RetrievedDocument {
                content: "chunk".into(),
                metadata: serde_json::Value::Null,
                distance: Some(0.1),
            }])
        }

        async fn delete(&self, _: Uuid) -> Result<()> {
            self.calls.lock().unwrap().push("delete".into());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_requires_session() {
        let store = FakeStore::default();
        let mut panel = RetrievalPanel::new();
        assert!(matches!(
            panel.retrieve(&store, "q", 5).await,
            Err(ChatError::NoSession)
        ));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_init_once_per_session() {
        let store = FakeStore::default();
        let mut panel = RetrievalPanel::new();
        let session = Uuid::new_v4();
        panel.bind_session(session);

        panel.add_document(&store, "text", None, "txt").await.unwrap();
        let docs = panel.retrieve(&store, "what", 3).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(store.calls(), vec!["init", "add:txt", "retrieve:what:3"]);

        // Same session: no reset
        panel.bind_session(session);
        assert!(panel.is_initialized());
        assert_eq!(panel.documents().len(), 1);

        panel.bind_session(Uuid::new_v4());
        assert!(!panel.is_initialized());
        assert!(panel.documents().is_empty());
    }

    #[tokio::test]
    async fn test_failed_init_blocks_retrieve() {
        let store = FakeStore {
            fail_init: true,
            ..Default::default()
        };
        let mut panel = RetrievalPanel::new();
        panel.bind_session(Uuid::new_v4());

        assert!(panel.retrieve(&store, "q", 5).await.is_err());
        assert!(!panel.is_initialized());
        assert_eq!(store.calls(), vec!["init"]);
    }

    #[tokio::test]
    async fn test_empty_input_rejected_locally() {
        let store = FakeStore::default();
        let mut panel = RetrievalPanel::new();
        panel.bind_session(Uuid::new_v4());
        assert!(panel.add_document(&store, "  ", None, "txt").await.is_err());
        assert!(panel.retrieve(&store, "", 5).await.is_err());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_resets_initialization() {
        let store = FakeStore::default();
        let mut panel = RetrievalPanel::new();
        panel.bind_session(Uuid::new_v4());
        panel.ensure_initialized(&store).await.unwrap();
        panel.delete_collection(&store).await.unwrap();
        assert!(!panel.is_initialized());
    }

    #[test]
    fn test_retrieved_document_shapes() {
        let doc = RetrievedDocument::from_value(serde_json::json!("plain")).unwrap();
        assert_eq!(doc.content, "plain");

        let doc = RetrievedDocument::from_value(serde_json::json!({
            "document": "text",
            "metadata": {"source": "a.md"},
            "distance": 0.25
        }))
        .unwrap();
        assert_eq!(doc.content, "text");
        assert_eq!(doc.distance, Some(0.25));
        assert!(RetrievedDocument::from_value(serde_json::json!(3)).is_none());
    }

    #[test]
    fn test_add_document_wire_shape() {
        let doc = AddDocument {
            session_id: Uuid::nil(),
            document: "d".into(),
            document_id: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            kind: "md".into(),
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["type"], "md");
        assert_eq!(json["chunk_size"], 1000);
        assert!(json.get("document_id").is_none());
    }
}
