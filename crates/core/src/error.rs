//! Error types for the GemRelay domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all GemRelay operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Remote service errors ---
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    // --- Client pool errors ---
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    // --- Conversation store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Attachment errors ---
    #[error("Attachment error: {0}")]
    Attachment(#[from] AttachmentError),

    // --- Rejected client input ---
    #[error("Invalid input: {0}")]
    Input(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("Remote request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Client not initialized: {0}")]
    NotInitialized(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Error)]
pub enum PoolError {
    #[error("No remote clients configured")]
    NoClients,

    #[error("Client id {0} not found")]
    UnknownClient(String),

    #[error("Failed to initialize clients: {}", format_failures(.0))]
    InitFailed(Vec<(String, RemoteError)>),
}

fn format_failures(failures: &[(String, RemoteError)]) -> String {
    failures
        .iter()
        .map(|(id, e)| format!("{id} ({e})"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Refusing to store an empty conversation")]
    EmptyConversation,

    #[error("Store is full: {size_on_disk} bytes on disk, limit {max_size}")]
    Full { size_on_disk: u64, max_size: u64 },
}

/// Attachment materialization failures.
///
/// `Rejected` is the caller's fault; `Transport` means a remote fetch or
/// local write failed.
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("{0}")]
    Rejected(String),

    #[error("Failed to fetch attachment: {0}")]
    Transport(String),
}
