//! Cleanup of model answers before they are returned or stored.

use gemrelay_core::ModelOutput;
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Markdown links the remote model emits as Google searches, e.g.
/// ``[`src/main.rs:12`](https://www.google.com/search?q=src/main.rs:12)``.
static SEARCH_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\()?\[`([^`]+?)`\]\((https://www\.google\.com/search\?q=)((?:[^)\\\n]|\\.)*?)\)\)*(\))?",
    )
    .expect("Invalid regex pattern for search links")
});

static QUOTED_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"`(\[[^\]]+\]\([^\)]+\))`").expect("Invalid regex pattern for quoted links")
});

static FILE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^:]+:\d+)").expect("Invalid regex pattern for file:line"));

/// Format a model answer as text.
///
/// With `include_thoughts`, the model's reasoning is prepended as a
/// `<think>` block. Over-escaped characters are restored and search links
/// are rewritten to point at their label.
pub fn extract_output(output: &ModelOutput, include_thoughts: bool) -> String {
    let mut text = String::new();

    if include_thoughts {
        if let Some(thoughts) = output.thoughts.as_deref().filter(|t| !t.is_empty()) {
            text.push_str("<think>");
            text.push_str(thoughts);
            text.push_str("</think>\n");
        }
    }
    text.push_str(&output.text);

    let text = text
        .replace("&lt;", "<")
        .replace("\\<", "<")
        .replace("\\_", "_")
        .replace("\\>", ">");

    let text = SEARCH_LINK.replace_all(&text, |caps: &Captures<'_>| {
        let label = &caps[2];
        let target = FILE_LINE
            .captures(label)
            .and_then(|m| m.get(1))
            .map_or(label, |m| m.as_str());
        let link = format!("[`{label}`]({target})");
        if caps.get(1).is_some() {
            format!("({link})")
        } else {
            link
        }
    });

    QUOTED_LINK.replace_all(&text, "$1").into_owned()
}
