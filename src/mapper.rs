use std::collections::BTreeMap;

use crate::models::chat::{ChatMessage, Role};
use crate::models::duckchat::{DuckChatMessage, DuckChatRequest};

/// Translate a client model alias; unknown names pass through unchanged.
pub fn map_model(requested: &str, mapping: &BTreeMap<String, String>) -> String {
    mapping
        .get(requested)
        .cloned()
        .unwrap_or_else(|| requested.to_string())
}

/// Shape a stored history into the upstream chat payload.
///
/// Upstream only understands `user` turns, so:
/// - the system prompt (the last one wins) is prepended to the first user message,
///   separated by a blank line;
/// - assistant turns are dropped;
/// - a system prompt with no user message is sent as the only user message.
pub fn to_duckchat_request(
    history: &[ChatMessage],
    requested_model: &str,
    mapping: &BTreeMap<String, String>,
) -> DuckChatRequest {
    let system = history
        .iter()
        .rev()
        .find(|m| m.role == Role::System)
        .map(|m| m.content.as_str());

    let mut messages: Vec<DuckChatMessage> = history
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| DuckChatMessage::user(m.content.clone()))
        .collect();

    if let Some(system) = system {
        match messages.first_mut() {
            Some(first) => first.content = format!("{system}\n\n{}", first.content),
            None => messages.push(DuckChatMessage::user(system)),
        }
    }

    DuckChatRequest {
        messages,
        model: map_model(requested_model, mapping),
    }
}
