//! HTTP bridge backend.
//!
//! Talks to a web-automation sidecar that holds the browser-cookie session
//! with the remote service. The bridge exposes two JSON endpoints:
//!
//! - `POST {base}/v1/sessions/init` authenticates one account and returns a
//!   handle for it.
//! - `POST {base}/v1/sessions/generate` sends a prompt (plus base64 files) on
//!   a session identified by the handle and its metadata, and returns the
//!   answer together with the updated metadata.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use gemrelay_core::conversation::SessionMetadata;
use gemrelay_core::error::RemoteError;
use gemrelay_core::remote::{ChatSession, ConnectOptions, Credentials, ModelOutput, RemoteBackend};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct Connection {
    handle: String,
    timeout: Duration,
}

/// Remote backend reached through the HTTP bridge.
pub struct BridgeBackend {
    base_url: String,
    client: reqwest::Client,
    connection: Arc<RwLock<Option<Connection>>>,
}

impl BridgeBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            connection: Arc::new(RwLock::new(None)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct InitRequest<'a> {
    secure_1psid: &'a str,
    secure_1psidts: &'a str,
    timeout: u64,
    auto_refresh: bool,
    refresh_interval: u64,
    verbose: bool,
}

#[derive(Deserialize)]
struct InitResponse {
    handle: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    handle: &'a str,
    model: &'a str,
    metadata: Option<&'a SessionMetadata>,
    prompt: &'a str,
    files: Vec<FilePayload>,
}

#[derive(Serialize)]
struct FilePayload {
    filename: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    text: String,
    #[serde(default)]
    thoughts: Option<String>,
    #[serde(default)]
    metadata: SessionMetadata,
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout(e.to_string())
    } else {
        RemoteError::Network(e.to_string())
    }
}

/// Send a JSON request and decode a JSON answer, mapping HTTP failures.
async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    body: &B,
) -> Result<R, RemoteError> {
    let response = client
        .post(url)
        .timeout(timeout)
        .json(body)
        .send()
        .await
        .map_err(transport_error)?;

    let status = response.status().as_u16();

    if status == 401 || status == 403 {
        let message = response.text().await.unwrap_or_default();
        return Err(RemoteError::AuthenticationFailed(if message.is_empty() {
            "Bridge rejected the account credentials".into()
        } else {
            message
        }));
    }

    if !(200..300).contains(&status) {
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Bridge returned error");
        return Err(RemoteError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| RemoteError::InvalidResponse(format!("Failed to parse bridge response: {e}")))
}

#[async_trait]
impl RemoteBackend for BridgeBackend {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn connect(
        &self,
        credentials: &Credentials,
        options: &ConnectOptions,
    ) -> Result<(), RemoteError> {
        let url = format!("{}/v1/sessions/init", self.base_url);
        let body = InitRequest {
            secure_1psid: &credentials.secure_1psid,
            secure_1psidts: &credentials.secure_1psidts,
            timeout: options.timeout.as_secs(),
            auto_refresh: options.auto_refresh,
            refresh_interval: options.refresh_interval.as_secs(),
            verbose: options.verbose,
        };

        debug!(url = %url, "Initializing bridge session");
        let response: InitResponse = post_json(&self.client, &url, options.timeout, &body).await?;

        *self.connection.write().await = Some(Connection {
            handle: response.handle,
            timeout: options.timeout,
        });
        Ok(())
    }

    async fn start_chat(
        &self,
        metadata: Option<SessionMetadata>,
        model: &str,
    ) -> Result<Box<dyn ChatSession>, RemoteError> {
        let connection = self
            .connection
            .read()
            .await
            .clone()
            .ok_or_else(|| RemoteError::NotInitialized(self.base_url.clone()))?;

        Ok(Box::new(BridgeSession {
            client: self.client.clone(),
            url: format!("{}/v1/sessions/generate", self.base_url),
            connection,
            model: model.to_string(),
            metadata,
        }))
    }
}

/// One chat on the bridge. Holds the continuation metadata between sends.
pub struct BridgeSession {
    client: reqwest::Client,
    url: String,
    connection: Connection,
    model: String,
    metadata: Option<SessionMetadata>,
}

impl BridgeSession {
    async fn encode_files(files: &[PathBuf]) -> Result<Vec<FilePayload>, RemoteError> {
        let mut payloads = Vec::with_capacity(files.len());
        for path in files {
            let bytes = tokio::fs::read(path).await.map_err(|e| {
                RemoteError::Network(format!("Failed to read {}: {e}", path.display()))
            })?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "attachment".into());
            payloads.push(FilePayload {
                filename,
                data: BASE64.encode(bytes),
            });
        }
        Ok(payloads)
    }
}

#[async_trait]
impl ChatSession for BridgeSession {
    fn metadata(&self) -> SessionMetadata {
        self.metadata.clone().unwrap_or_default()
    }

    async fn send_message(
        &mut self,
        prompt: &str,
        files: &[PathBuf],
    ) -> Result<ModelOutput, RemoteError> {
        let body = GenerateRequest {
            handle: &self.connection.handle,
            model: &self.model,
            metadata: self.metadata.as_ref(),
            prompt,
            files: Self::encode_files(files).await?,
        };

        debug!(
            model = %self.model,
            resumed = self.metadata.is_some(),
            files = files.len(),
            "Sending prompt to bridge"
        );
        let response: GenerateResponse =
            post_json(&self.client, &self.url, self.connection.timeout, &body).await?;

        self.metadata = Some(response.metadata.clone());
        Ok(ModelOutput {
            text: response.text,
            thoughts: response.thoughts,
            metadata: response.metadata,
        })
    }
}
