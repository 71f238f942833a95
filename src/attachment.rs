//! File attachments
//!
//! Files are read whole, base64-encoded for the wire, and tagged with a mime
//! type guessed from the extension. Text-like files keep their decoded text so
//! the engine can send it as the turn's source document.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{ChatError, Result};

/// Largest file accepted as an attachment
pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Base64 of the raw file bytes
    pub encoded_payload: String,
    /// Opaque handle the front-end uses to render a preview (the source path here)
    pub preview_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Attachment {
    pub fn from_path(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path)?;
        if !meta.is_file() {
            return Err(ChatError::Attachment(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        if meta.len() > MAX_ATTACHMENT_BYTES {
            return Err(ChatError::Attachment(format!(
                "{} is {} bytes, limit is {}",
                path.display(),
                meta.len(),
                MAX_ATTACHMENT_BYTES
            )));
        }

        let bytes = fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());

        Ok(Self::from_bytes(&name, &bytes, path.display().to_string()))
    }

    pub fn from_bytes(name: &str, bytes: &[u8], preview_ref: String) -> Self {
        let mime_type = guess_mime(name).to_string();
        let text = if is_text_mime(&mime_type) {
            Some(String::from_utf8_lossy(bytes).into_owned())
        } else {
            None
        };

        Self {
            name: name.to_string(),
            mime_type,
            size_bytes: bytes.len() as u64,
            encoded_payload: STANDARD.encode(bytes),
            preview_ref,
            text,
        }
    }

    pub fn kind(&self) -> AttachmentKind {
        if self.mime_type.starts_with("image/") {
            AttachmentKind::Image
        } else {
            AttachmentKind::Document
        }
    }

    pub fn is_image(&self) -> bool {
        self.kind() == AttachmentKind::Image
    }

    /// Data URL form the backend accepts for images
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.encoded_payload)
    }
}

/// Whether any attachment needs an image-capable provider
pub fn needs_images(attachments: &[Attachment]) -> bool {
    attachments.iter().any(Attachment::is_image)
}

fn guess_mime(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

fn is_text_mime(mime: &str) -> bool {
    mime.starts_with("text/") || mime == "application/json"
}
