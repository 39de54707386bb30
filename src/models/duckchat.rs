use serde::{Deserialize, Serialize};

/// Message entry of the upstream chat payload. Upstream only accepts `user` roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuckChatMessage {
    pub role: String,
    pub content: String,
}

impl DuckChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Body of `POST /duckchat/v1/chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuckChatRequest {
    pub messages: Vec<DuckChatMessage>,
    pub model: String,
}

/// One decoded `data:` event of the upstream SSE body.
///
/// Upstream also emits bookkeeping events (role announcements, a final
/// `action` object); only those carrying `message` produce output text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DuckChatEvent {
    #[serde(default)]
    pub message: Option<String>,
}
