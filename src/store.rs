use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::models::chat::ChatMessage;

/// Per-conversation message history.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Ordered history for `id`; empty when unknown.
    async fn get(&self, id: &str) -> Vec<ChatMessage>;
    /// Replace the history for `id`.
    async fn put(&self, id: &str, messages: Vec<ChatMessage>);
    /// Append one message, creating the record if needed.
    async fn append(&self, id: &str, message: ChatMessage);
}

/// Process-lifetime store: one map behind one mutex.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.conversations.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, id: &str) -> Vec<ChatMessage> {
        self.conversations
            .lock()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    async fn put(&self, id: &str, messages: Vec<ChatMessage>) {
        self.conversations
            .lock()
            .await
            .insert(id.to_string(), messages);
    }

    async fn append(&self, id: &str, message: ChatMessage) {
        self.conversations
            .lock()
            .await
            .entry(id.to_string())
            .or_default()
            .push(message);
    }
}
