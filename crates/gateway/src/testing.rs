//! Router test fixtures: a canned remote backend and a ready-made state.

use async_trait::async_trait;
use gemrelay_config::AppConfig;
use gemrelay_core::{
    ChatSession, ConnectOptions, Credentials, ModelOutput, RemoteBackend, RemoteError,
    SessionMetadata,
};
use gemrelay_pool::{ClientPool, PoolMember};
use gemrelay_store::{ConversationStore, StoreOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::{AppState, SharedState};

/// A remote prompt as the backend received it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub metadata: Option<SessionMetadata>,
    pub prompt: String,
}

/// Answers every prompt with the same output.
#[derive(Clone)]
pub struct MockBackend {
    reply: Result<ModelOutput, RemoteError>,
    connect_error: Option<RemoteError>,
    sent: Arc<Mutex<Vec<Sent>>>,
}

impl MockBackend {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(ModelOutput {
                text: text.into(),
                thoughts: None,
                metadata: vec![Some("c_1".into()), Some("r_1".into())],
            }),
            connect_error: None,
            sent: Arc::default(),
        }
    }

    pub fn with_thoughts(mut self, thoughts: &str) -> Self {
        if let Ok(reply) = self.reply.as_mut() {
            reply.thoughts = Some(thoughts.into());
        }
        self
    }

    pub fn failing_send(error: RemoteError) -> Self {
        Self {
            reply: Err(error),
            ..Self::replying("")
        }
    }

    pub fn failing_connect(error: RemoteError) -> Self {
        Self {
            connect_error: Some(error),
            ..Self::replying("")
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

struct MockSession {
    metadata: Option<SessionMetadata>,
    reply: Result<ModelOutput, RemoteError>,
    sent: Arc<Mutex<Vec<Sent>>>,
}

#[async_trait]
impl ChatSession for MockSession {
    fn metadata(&self) -> SessionMetadata {
        self.metadata.clone().unwrap_or_default()
    }

    async fn send_message(
        &mut self,
        prompt: &str,
        _files: &[PathBuf],
    ) -> Result<ModelOutput, RemoteError> {
        self.sent.lock().unwrap().push(Sent {
            metadata: self.metadata.clone(),
            prompt: prompt.to_string(),
        });
        let reply = self.reply.clone()?;
        self.metadata = Some(reply.metadata.clone());
        Ok(reply)
    }
}

#[async_trait]
impl RemoteBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(
        &self,
        _credentials: &Credentials,
        _options: &ConnectOptions,
    ) -> Result<(), RemoteError> {
        match &self.connect_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn start_chat(
        &self,
        metadata: Option<SessionMetadata>,
        _model: &str,
    ) -> Result<Box<dyn ChatSession>, RemoteError> {
        Ok(Box::new(MockSession {
            metadata,
            reply: self.reply.clone(),
            sent: self.sent.clone(),
        }))
    }
}

/// State backed by one pool member `c0` and a store in a temp dir.
pub struct Harness {
    pub state: SharedState,
    pub backend: MockBackend,
    _dir: TempDir,
}

pub fn harness(config: AppConfig, backend: MockBackend) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let member = PoolMember::new(
        "c0",
        Credentials {
            secure_1psid: "sid".into(),
            secure_1psidts: "ts".into(),
        },
        ConnectOptions::default(),
        Arc::new(backend.clone()),
    );
    let pool = ClientPool::new(vec![member]).unwrap();
    let store = ConversationStore::open(
        StoreOptions {
            path: dir.path().join("conversations"),
            max_size: u64::MAX,
        },
        pool.ids(),
    )
    .unwrap();

    Harness {
        state: Arc::new(AppState::new(config, pool, store).unwrap()),
        backend,
        _dir: dir,
    }
}

/// Like [`harness`], with the pool already brought up.
pub async fn live_harness(config: AppConfig, backend: MockBackend) -> Harness {
    let harness = harness(config, backend);
    harness.state.pool.init().await.unwrap();
    harness
}
