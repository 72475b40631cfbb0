//! # GemRelay Core
//!
//! Domain types, traits, and error definitions for the GemRelay
//! chat-completion proxy. This crate has **no framework dependencies**; it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! The remote conversational service is reached through the
//! [`RemoteBackend`] trait defined here; concrete backends live in
//! `gemrelay-pool`. This enables:
//! - Swapping the web-automation client without touching the store or matcher
//! - Easy testing with scripted backends
//! - Clean dependency graph (all crates depend inward on core)

pub mod conversation;
pub mod error;
pub mod message;
pub mod remote;

// Re-export key types at crate root for ergonomics
pub use conversation::{SessionMetadata, StoredConversation};
pub use error::{AttachmentError, Error, PoolError, RemoteError, Result, StoreError};
pub use message::{ContentKind, ContentPart, Message, MessageContent, Role};
pub use remote::{ChatSession, ConnectOptions, Credentials, ModelOutput, RemoteBackend};
