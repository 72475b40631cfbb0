//! A single authenticated account in the pool.

use async_trait::async_trait;
use gemrelay_core::conversation::SessionMetadata;
use gemrelay_core::error::RemoteError;
use gemrelay_core::remote::{
    ChatSession, ConnectOptions, Credentials, ModelOutput, RemoteBackend,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// One configured remote account.
///
/// Members are never checked out: any number of requests may open sessions
/// on the same member at once. Only the liveness flag changes after
/// construction.
pub struct PoolMember {
    id: String,
    credentials: Credentials,
    options: ConnectOptions,
    backend: Arc<dyn RemoteBackend>,
    live: Arc<AtomicBool>,
    init_lock: Mutex<()>,
}

impl PoolMember {
    pub fn new(
        id: impl Into<String>,
        credentials: Credentials,
        options: ConnectOptions,
        backend: Arc<dyn RemoteBackend>,
    ) -> Self {
        Self {
            id: id.into(),
            credentials,
            options,
            backend,
            live: Arc::new(AtomicBool::new(false)),
            init_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Connect the member if it is not live yet.
    ///
    /// Concurrent callers wait on the same bring-up; only one connect is
    /// issued.
    pub async fn init(&self) -> Result<(), RemoteError> {
        if self.is_live() {
            return Ok(());
        }

        let _guard = self.init_lock.lock().await;
        if self.is_live() {
            return Ok(());
        }

        match self.backend.connect(&self.credentials, &self.options).await {
            Ok(()) => {
                self.live.store(true, Ordering::Release);
                info!(client = %self.id, backend = self.backend.name(), "Client initialized");
                Ok(())
            }
            Err(e) => {
                warn!(client = %self.id, error = %e, "Client failed to initialize");
                Err(e)
            }
        }
    }

    /// Mark the member as needing a fresh connect.
    pub fn mark_down(&self) {
        mark_down(&self.live, &self.id);
    }

    /// Open a chat session, resuming `metadata` when given.
    ///
    /// An authentication failure, here or on any later send through the
    /// returned session, takes the member down until the next `init()`.
    pub async fn start_chat(
        &self,
        metadata: Option<SessionMetadata>,
        model: &str,
    ) -> Result<Box<dyn ChatSession>, RemoteError> {
        if !self.is_live() {
            return Err(RemoteError::NotInitialized(self.id.clone()));
        }

        match self.backend.start_chat(metadata, model).await {
            Ok(inner) => Ok(Box::new(MemberSession {
                inner,
                client: self.id.clone(),
                live: Arc::clone(&self.live),
            })),
            Err(e) => {
                if matches!(e, RemoteError::AuthenticationFailed(_)) {
                    self.mark_down();
                }
                Err(e)
            }
        }
    }
}

fn mark_down(live: &AtomicBool, client: &str) {
    if live.swap(false, Ordering::AcqRel) {
        warn!(client = %client, "Client marked as not live");
    }
}

/// Session handed out by a member; shares the member's liveness flag.
struct MemberSession {
    inner: Box<dyn ChatSession>,
    client: String,
    live: Arc<AtomicBool>,
}

#[async_trait]
impl ChatSession for MemberSession {
    fn metadata(&self) -> SessionMetadata {
        self.inner.metadata()
    }

    async fn send_message(
        &mut self,
        prompt: &str,
        files: &[PathBuf],
    ) -> Result<ModelOutput, RemoteError> {
        let result = self.inner.send_message(prompt, files).await;
        if let Err(RemoteError::AuthenticationFailed(_)) = &result {
            mark_down(&self.live, &self.client);
        }
        result
    }
}

impl std::fmt::Debug for PoolMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolMember")
            .field("id", &self.id)
            .field("backend", &self.backend.name())
            .field("live", &self.is_live())
            .finish()
    }
}
