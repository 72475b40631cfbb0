//! Remote client pool for GemRelay.
//!
//! Owns the fixed set of configured accounts, brings them up, and hands them
//! out by id or in round-robin order. The concrete transport is the
//! [`BridgeBackend`]; anything implementing
//! [`RemoteBackend`](gemrelay_core::RemoteBackend) can stand in for it.

pub mod bridge;
pub mod member;
pub mod pool;

pub use bridge::{BridgeBackend, BridgeSession};
pub use member::PoolMember;
pub use pool::ClientPool;
