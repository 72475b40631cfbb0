//! GemRelay conversation store.
//!
//! Persists finished exchanges keyed by a fingerprint of their message
//! history, so a later request that replays the same history plus one new
//! user turn can be routed back to the remote session that produced it.

pub mod fingerprint;
pub mod maintenance;
pub mod sanitize;
pub mod store;

pub use fingerprint::{Fingerprint, fingerprint, hash_message};
pub use maintenance::{DumpRecord, Retention, RetentionParseError, RotateReport};
pub use sanitize::{remove_think_tags, sanitize, sanitize_message};
pub use store::{ConversationStore, StoreOptions, StoreStats};
