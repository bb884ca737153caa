//! Conversation Store
//!
//! Ordered, append-only message history keyed by session id. The
//! orchestrator receives a store at construction time instead of reaching
//! for a process-wide map.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CoreResult;
use crate::message::Message;

/// Append-only message history for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    session_id: String,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}

/// Storage interface consumed by the orchestrator.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Return the conversation for `session_id`, creating an empty one if needed.
    async fn get_or_create(&self, session_id: &str) -> CoreResult<Conversation>;

    /// Append a message to the session, creating the session if needed.
    async fn append(&self, session_id: &str, message: Message) -> CoreResult<()>;

    /// Ordered history of the session (empty for unknown sessions).
    async fn history(&self, session_id: &str) -> CoreResult<Vec<Message>>;
}

/// In-memory store; lives as long as the process that created it.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently held.
    pub async fn session_count(&self) -> usize {
        self.conversations.read().await.len()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_or_create(&self, session_id: &str) -> CoreResult<Conversation> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .entry(session_id.to_string())
            .or_insert_with(|| Conversation::new(session_id));
        Ok(conversation.clone())
    }

    async fn append(&self, session_id: &str, message: Message) -> CoreResult<()> {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(session_id.to_string())
            .or_insert_with(|| Conversation::new(session_id))
            .push(message);
        Ok(())
    }

    async fn history(&self, session_id: &str) -> CoreResult<Vec<Message>> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(session_id)
            .map(|c| c.messages().to_vec())
            .unwrap_or_default())
    }
}
