//! Attachment materialization.
//!
//! Turns inline attachment references into files inside a scratch directory
//! so they can be uploaded alongside a prompt. Bad input (undecodable base64,
//! unsupported URL schemes) is [`AttachmentError::Rejected`]; failed fetches
//! and failed local writes are [`AttachmentError::Transport`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use gemrelay_core::error::AttachmentError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const DEFAULT_SUFFIX: &str = ".bin";
const INLINE_IMAGE_SUFFIX: &str = ".png";

/// Writes attachments to disk, fetching remote ones over HTTP.
#[derive(Debug, Clone, Default)]
pub struct Materializer {
    client: reqwest::Client,
}

impl Materializer {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// A materializer whose remote fetches give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, AttachmentError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AttachmentError::Transport(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::new(client))
    }

    /// Save an image reference: a `data:image/...;base64,` URI or an
    /// `http(s)` URL.
    pub async fn save_url(&self, url: &str, dir: &Path) -> Result<PathBuf, AttachmentError> {
        if url.starts_with("data:image/") {
            let (_, payload) = url.split_once(',').ok_or_else(|| {
                AttachmentError::Rejected("Image data URI has no payload".into())
            })?;
            let bytes = decode_base64(payload)?;
            return write_temp(&bytes, INLINE_IMAGE_SUFFIX, dir).await;
        }

        let parsed = reqwest::Url::parse(url)
            .map_err(|e| AttachmentError::Rejected(format!("Invalid image URL '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AttachmentError::Rejected(format!(
                "Unsupported image URL scheme '{}'",
                parsed.scheme()
            )));
        }

        debug!(url, "Fetching attachment");
        let bytes = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AttachmentError::Transport(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| AttachmentError::Transport(e.to_string()))?;

        let suffix = suffix_of(parsed.path()).unwrap_or_else(|| DEFAULT_SUFFIX.to_string());
        write_temp(&bytes, &suffix, dir).await
    }

    /// Save a base64 file payload, keeping the extension of `filename`.
    pub async fn save_base64(
        &self,
        file_data: &str,
        filename: Option<&str>,
        dir: &Path,
    ) -> Result<PathBuf, AttachmentError> {
        let bytes = decode_base64(file_data)?;
        let suffix = filename
            .and_then(suffix_of)
            .unwrap_or_else(|| DEFAULT_SUFFIX.to_string());
        write_temp(&bytes, &suffix, dir).await
    }
}

fn decode_base64(payload: &str) -> Result<Vec<u8>, AttachmentError> {
    BASE64
        .decode(payload.trim())
        .map_err(|e| AttachmentError::Rejected(format!("Invalid base64 payload: {e}")))
}

/// `.ext` of the last path segment, if any.
fn suffix_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
}

async fn write_temp(bytes: &[u8], suffix: &str, dir: &Path) -> Result<PathBuf, AttachmentError> {
    let local = |e: std::io::Error| AttachmentError::Transport(format!("Failed to write attachment: {e}"));

    let (_, path) = tempfile::Builder::new()
        .prefix("gemrelay-")
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(local)?
        .keep()
        .map_err(|e| local(e.error))?;

    tokio::fs::write(&path, bytes).await.map_err(local)?;
    debug!(path = %path.display(), size = bytes.len(), "Attachment written");
    Ok(path)
}
