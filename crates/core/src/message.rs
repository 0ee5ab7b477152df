//! Prompt message domain types.
//!
//! These are the value objects that flow through the whole pipeline:
//! the assembler builds them, memory replays them, the streaming client
//! serializes them into the upstream request and every chunk carries them.

use serde::{Deserialize, Serialize};

/// The role of a message sender in a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (pre-prompt, context, histories)
    System,
    /// The end user
    User,
    /// The model
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One part of a structured (multi-part) message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Message body: plain text or an ordered list of parts.
///
/// Serializes untagged, which matches the OpenAI wire shape
/// (`"content": "..."` or `"content": [{"type": "text", ...}]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for PromptContent {
    fn default() -> Self {
        PromptContent::Text(String::new())
    }
}

/// A single role-tagged message. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: PromptContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: PromptContent::Text(content.into()),
            name: None,
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a user message from structured parts.
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: PromptContent::Parts(parts),
            name: None,
        }
    }

    /// The textual content. Non-text parts are ignored.
    pub fn text(&self) -> String {
        match &self.content {
            PromptContent::Text(text) => text.clone(),
            PromptContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.content {
            PromptContent::Text(text) => text.is_empty(),
            PromptContent::Parts(parts) => parts.is_empty(),
        }
    }

    /// The `{role, content[, name]}` object sent upstream.
    pub fn to_request_value(&self) -> serde_json::Value {
        let mut value = serde_json::json!({
            "role": self.role.as_str(),
            "content": self.content,
        });
        if let Some(name) = &self.name {
            value["name"] = serde_json::Value::String(name.clone());
        }
        value
    }
}
