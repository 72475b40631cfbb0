//! Remote backend traits: the abstraction over the web-automation client.
//!
//! A [`RemoteBackend`] knows how to authenticate one account against the
//! remote conversational service and open chat sessions on it, either fresh
//! or resumed from stored [`SessionMetadata`]. A [`ChatSession`] sends one
//! prompt at a time and reports the continuation token to persist.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::conversation::SessionMetadata;
use crate::error::RemoteError;

/// Cookie credentials for one remote account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub secure_1psid: String,
    pub secure_1psidts: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("secure_1psid", &"[REDACTED]")
            .field("secure_1psidts", &"[REDACTED]")
            .finish()
    }
}

/// Connection and cookie-refresh policy applied when a backend connects.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub timeout: Duration,
    pub auto_refresh: bool,
    pub refresh_interval: Duration,
    pub verbose: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            auto_refresh: true,
            refresh_interval: Duration::from_secs(540),
            verbose: false,
        }
    }
}

/// One answer from the remote model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    /// The visible answer text
    pub text: String,

    /// The model's reasoning, when the model exposes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,

    /// Continuation token after this answer
    #[serde(default)]
    pub metadata: SessionMetadata,
}

/// An open conversation on the remote service.
#[async_trait]
pub trait ChatSession: Send {
    /// Current continuation token; updated by every successful send.
    fn metadata(&self) -> SessionMetadata;

    /// Send a prompt (plus local attachment files) and wait for the answer.
    async fn send_message(
        &mut self,
        prompt: &str,
        files: &[PathBuf],
    ) -> std::result::Result<ModelOutput, RemoteError>;
}

/// The core RemoteBackend trait.
///
/// One instance exists per pool member. `connect` is called by the pool
/// during bring-up and may be called again after a failure; `start_chat` is
/// only called once the member is live.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// A human-readable backend name (e.g. "bridge").
    fn name(&self) -> &str;

    /// Establish the authenticated connection.
    async fn connect(
        &self,
        credentials: &Credentials,
        options: &ConnectOptions,
    ) -> std::result::Result<(), RemoteError>;

    /// Open a chat session, resuming `metadata` when given.
    async fn start_chat(
        &self,
        metadata: Option<SessionMetadata>,
        model: &str,
    ) -> std::result::Result<Box<dyn ChatSession>, RemoteError>;
}
