//! Session continuity for GemRelay.
//!
//! Decides whether an incoming chat history continues a stored remote
//! session, renders the prompt that goes to the remote model, cleans up its
//! answer, and records the finished exchange.

pub mod attachments;
pub mod matcher;
pub mod output;
pub mod prompt;

pub use attachments::Materializer;
pub use matcher::{ContinuityMatcher, Exchange, is_reusable};
pub use output::extract_output;
pub use prompt::{RenderedInput, add_tag, render_conversation, render_message};
