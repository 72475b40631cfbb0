//! Reasoning-block stripping for assistant messages.

use gemrelay_core::{Message, MessageContent, Role};
use regex::Regex;
use std::borrow::{Borrow, Cow};
use std::sync::LazyLock;

static LEADING_THINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*(?:<think>.*?</think>\s*)+").expect("Invalid regex pattern for think block")
});

/// Remove the leading `<think>...</think>` blocks and trim surrounding
/// whitespace. Consecutive blocks are all stripped, so a second pass is a
/// no-op.
pub fn remove_think_tags(text: &str) -> Cow<'_, str> {
    let stripped = LEADING_THINK.replace(text, "");
    let trimmed = stripped.trim();
    if trimmed.len() == text.len() {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(trimmed.to_string())
    }
}

/// Clean assistant messages that carry plain text.
///
/// Messages that do not change are borrowed. Other roles and structured
/// assistant content pass through untouched.
pub fn sanitize<'a, M: Borrow<Message>>(messages: &'a [M]) -> Vec<Cow<'a, Message>> {
    messages
        .iter()
        .map(|message| sanitize_message(message.borrow()))
        .collect()
}

pub fn sanitize_message(message: &Message) -> Cow<'_, Message> {
    if message.role != Role::Assistant {
        return Cow::Borrowed(message);
    }
    let MessageContent::Text(text) = &message.content else {
        return Cow::Borrowed(message);
    };
    match remove_think_tags(text) {
        Cow::Borrowed(_) => Cow::Borrowed(message),
        Cow::Owned(cleaned) => Cow::Owned(message.with_content(cleaned)),
    }
}
