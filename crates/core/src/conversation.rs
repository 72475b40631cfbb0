//! The persisted conversation snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Opaque continuation tokens the remote service uses to resume a session.
///
/// Never interpreted locally; round-tripped exactly as received.
pub type SessionMetadata = Vec<Option<String>>;

/// A full conversation snapshot as kept in the conversation store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredConversation {
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    /// Model used for the conversation. The remote service cannot switch
    /// models inside an existing session, so this is part of its identity.
    pub model: String,

    /// Identifier of the pool member that owns the remote session
    pub client_id: String,

    /// Session metadata for resuming the remote conversation
    pub metadata: SessionMetadata,

    /// Message history, ending with the model's latest answer
    pub messages: Vec<Message>,
}

impl StoredConversation {
    pub fn new(
        model: impl Into<String>,
        client_id: impl Into<String>,
        metadata: SessionMetadata,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            created_at: None,
            updated_at: None,
            model: model.into(),
            client_id: client_id.into(),
            metadata,
            messages,
        }
    }

    /// Most recent timestamp: `updated_at`, falling back to `created_at`.
    pub fn last_touched(&self) -> Option<DateTime<Utc>> {
        self.updated_at.or(self.created_at)
    }

    /// Equality ignoring timestamps.
    pub fn same_content(&self, other: &Self) -> bool {
        self.model == other.model
            && self.client_id == other.client_id
            && self.metadata == other.metadata
            && self.messages == other.messages
    }
}
