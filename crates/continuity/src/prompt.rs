//! Prompt rendering.
//!
//! A fresh remote session receives the whole history as one string, each
//! message wrapped in ChatML-style role tags and followed by an open
//! assistant tag. A resumed session receives only the new user turn,
//! untagged.

use gemrelay_core::error::AttachmentError;
use gemrelay_core::{ContentKind, Message, MessageContent, Role};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::attachments::Materializer;

pub const TAG_START: &str = "<|im_start|>";
pub const TAG_END: &str = "<|im_end|>";

/// Text to send plus the files that go with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedInput {
    pub text: String,
    pub files: Vec<PathBuf>,
}

/// Wrap `content` in role tags. With `open`, the closing tag is left off.
pub fn add_tag(role: Role, content: &str, open: bool) -> String {
    let mut tagged = format!("{TAG_START}{role}\n{content}");
    if !open {
        tagged.push('\n');
        tagged.push_str(TAG_END);
    }
    tagged
}

/// Render one message, materializing its attachments into `dir`.
///
/// Text parts are joined with newlines. Empty text is never tagged.
pub async fn render_message(
    message: &Message,
    materializer: &Materializer,
    dir: &Path,
    tagged: bool,
) -> Result<RenderedInput, AttachmentError> {
    let mut rendered = RenderedInput::default();

    match &message.content {
        MessageContent::Text(text) => rendered.text = text.clone(),
        MessageContent::Parts(parts) => {
            let mut texts = Vec::new();
            for part in parts {
                match part.kind {
                    ContentKind::Text => texts.push(part.text.as_deref().unwrap_or_default()),
                    ContentKind::ImageUrl => {
                        let url = required_field(part.image_url.as_ref(), "url", "Image URL")?;
                        rendered.files.push(materializer.save_url(url, dir).await?);
                    }
                    ContentKind::File => {
                        let file = part.file.as_ref();
                        let data = required_field(file, "file_data", "File")?;
                        let filename = file.and_then(|f| f.get("filename")).map(String::as_str);
                        rendered
                            .files
                            .push(materializer.save_base64(data, filename, dir).await?);
                    }
                    ContentKind::InputAudio => {}
                }
            }
            rendered.text = texts.join("\n");
        }
    }

    if tagged && !rendered.text.is_empty() {
        rendered.text = add_tag(message.role, &rendered.text, false);
    }
    Ok(rendered)
}

/// Render a whole history for a fresh session.
pub async fn render_conversation(
    messages: &[Message],
    materializer: &Materializer,
    dir: &Path,
) -> Result<RenderedInput, AttachmentError> {
    let mut lines = Vec::with_capacity(messages.len() + 1);
    let mut files = Vec::new();

    for message in messages {
        let rendered = render_message(message, materializer, dir, true).await?;
        lines.push(rendered.text);
        files.extend(rendered.files);
    }
    lines.push(add_tag(Role::Assistant, "", true));

    Ok(RenderedInput {
        text: lines.join("\n"),
        files,
    })
}

fn required_field<'a>(
    map: Option<&'a BTreeMap<String, String>>,
    key: &str,
    what: &str,
) -> Result<&'a str, AttachmentError> {
    let map = map
        .filter(|m| !m.is_empty())
        .ok_or_else(|| AttachmentError::Rejected(format!("{what} cannot be empty")))?;
    map.get(key)
        .filter(|v| !v.is_empty())
        .map(String::as_str)
        .ok_or_else(|| AttachmentError::Rejected(format!("{what} must contain '{key}' key")))
}
