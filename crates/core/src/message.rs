//! Message domain types.
//!
//! These are the value objects that flow through the whole system:
//! client request → continuity matcher → remote session → conversation store.
//! They mirror the OpenAI chat message schema closely enough to be
//! deserialized straight from a `/v1/chat/completions` request body.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The remote model
    Assistant,
    /// System instructions
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of a structured content part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    ImageUrl,
    File,
    InputAudio,
}

/// One part of a structured (multi-part) message body.
///
/// Sub-fields are optional at the schema level; whether the part is
/// well-formed is decided when the part is rendered for the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: ContentKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// `{"url": "..."}`, either a `data:` URI or a remote URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<BTreeMap<String, String>>,

    /// `{"file_data": "<base64>", "filename": "..."}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<BTreeMap<String, String>>,
}

impl ContentPart {
    /// A plain text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Text,
            text: Some(text.into()),
            image_url: None,
            file: None,
        }
    }

    /// An image part referencing `url`.
    pub fn image_url(url: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::ImageUrl,
            text: None,
            image_url: Some(BTreeMap::from([("url".to_string(), url.into())])),
            file: None,
        }
    }

    /// A file part carrying base64-encoded bytes.
    pub fn file(file_data: impl Into<String>, filename: Option<&str>) -> Self {
        let mut file = BTreeMap::from([("file_data".to_string(), file_data.into())]);
        if let Some(name) = filename {
            file.insert("filename".to_string(), name.to_string());
        }
        Self {
            kind: ContentKind::File,
            text: None,
            image_url: None,
            file: Some(file),
        }
    }
}

/// Message body: plain text or an ordered sequence of typed parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }

    /// The plain text, if this body is not structured.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Parts(_) => None,
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

/// A single conversation turn. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// Text or structured content
    pub content: MessageContent,

    /// Optional participant name (OpenAI schema)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content)
    }

    /// Same role and name, different body.
    pub fn with_content(&self, content: impl Into<MessageContent>) -> Self {
        Self {
            role: self.role,
            content: content.into(),
            name: self.name.clone(),
        }
    }

    /// Rough character count of the plain-text portions.
    pub fn text_len(&self) -> usize {
        match &self.content {
            MessageContent::Text(text) => text.chars().count(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .map(|t| t.chars().count())
                .sum(),
        }
    }
}
