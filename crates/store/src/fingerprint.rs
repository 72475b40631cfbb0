//! Conversation fingerprinting.
//!
//! A fingerprint identifies `(client_id, model, messages)` independently of
//! how the messages' JSON maps happen to be ordered. Each message is
//! serialized canonically (object keys sorted, compact form) and hashed on its
//! own; the running SHA-256 then absorbs the client id, the model, and the
//! per-message hex digests in that order.

use gemrelay_core::Message;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::borrow::Borrow;
use std::collections::BTreeMap;

/// Hex-encoded SHA-256 digest of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<[u8]> for Fingerprint {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Fingerprint a conversation as seen by one pool member.
pub fn fingerprint<M: Borrow<Message>>(client_id: &str, model: &str, messages: &[M]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(client_id.as_bytes());
    hasher.update(model.as_bytes());
    for message in messages {
        hasher.update(hash_message(message.borrow()).as_bytes());
    }
    Fingerprint(hex::encode(hasher.finalize()))
}

/// Hex SHA-256 of a single message's canonical JSON.
pub fn hash_message(message: &Message) -> String {
    let canonical = serde_json::to_value(message)
        .map(canonicalize)
        .unwrap_or_default();
    hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
}

/// Rebuild every object with its keys in sorted order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
