//! In-memory collaborators. They keep everything in process, record the calls
//! they receive and can be told to fail, which makes them usable both for
//! offline runs and for exercising the engine's failure paths.

use crate::backend::{
    CollaboratorError, CommentStore, ConnectionsDirectory, ConversationStore, IdentityProvider,
    Transport,
};
use async_trait::async_trait;
use chrono::Utc;
use flowbox_core::{
    Comment, CommentId, Connections, Conversation, ConversationId, ConversationUpdate, Identity,
    Message, NewComment, OutgoingMessage, UserId,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct StoreState {
    conversations: BTreeMap<ConversationId, Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
    comments: HashMap<ConversationId, Vec<Comment>>,
    connections: Connections,
    updates: Vec<(ConversationId, ConversationUpdate)>,
    list_calls: usize,
    list_failures: VecDeque<String>,
    update_failures: VecDeque<String>,
    update_delay: Option<Duration>,
}

/// Conversation, comment and connections store backed by maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_conversation(&self, conversation: Conversation) {
        self.state
            .lock()
            .await
            .conversations
            .insert(conversation.id.clone(), conversation);
    }

    /// Appends a message, as a provider delivering it would.
    pub async fn push_message(&self, message: Message) {
        self.state
            .lock()
            .await
            .messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
    }

    pub async fn set_connections(&self, connections: Connections) {
        self.state.lock().await.connections = connections;
    }

    pub async fn conversation(&self, id: &ConversationId) -> Option<Conversation> {
        self.state.lock().await.conversations.get(id).cloned()
    }

    /// Every update received, in order.
    pub async fn updates(&self) -> Vec<(ConversationId, ConversationUpdate)> {
        self.state.lock().await.updates.clone()
    }

    pub async fn list_calls(&self) -> usize {
        self.state.lock().await.list_calls
    }

    pub async fn fail_next_list(&self, reason: &str) {
        self.state
            .lock()
            .await
            .list_failures
            .push_back(reason.to_string());
    }

    pub async fn fail_next_update(&self, reason: &str) {
        self.state
            .lock()
            .await
            .update_failures
            .push_back(reason.to_string());
    }

    /// Makes every update wait before answering.
    pub async fn set_update_delay(&self, delay: Duration) {
        self.state.lock().await.update_delay = Some(delay);
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn list_conversations(
        &self,
        user: &UserId,
    ) -> Result<Vec<Conversation>, CollaboratorError> {
        let mut state = self.state.lock().await;
        state.list_calls += 1;
        if let Some(reason) = state.list_failures.pop_front() {
            return Err(CollaboratorError::Unavailable(reason));
        }
        Ok(state
            .conversations
            .values()
            .filter(|conversation| {
                conversation.is_owned_by(user) || conversation.has_participant(user)
            })
            .cloned()
            .collect())
    }

    async fn update_conversation(
        &self,
        id: &ConversationId,
        update: &ConversationUpdate,
    ) -> Result<Conversation, CollaboratorError> {
        let delay = self.state.lock().await.update_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        state.updates.push((id.clone(), update.clone()));
        if let Some(reason) = state.update_failures.pop_front() {
            return Err(CollaboratorError::Rejected(reason));
        }
        let conversation = state
            .conversations
            .get_mut(id)
            .ok_or_else(|| CollaboratorError::NotFound(id.to_string()))?;
        update.apply_to(conversation);
        Ok(conversation.clone())
    }

    async fn list_messages(&self, id: &ConversationId) -> Result<Vec<Message>, CollaboratorError> {
        Ok(self
            .state
            .lock()
            .await
            .messages
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), CollaboratorError> {
        let mut state = self.state.lock().await;
        state.messages.remove(id);
        state.comments.remove(id);
        state
            .conversations
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CollaboratorError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl CommentStore for MemoryStore {
    async fn list_comments(&self, id: &ConversationId) -> Result<Vec<Comment>, CollaboratorError> {
        Ok(self
            .state
            .lock()
            .await
            .comments
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_comment(
        &self,
        id: &ConversationId,
        comment: &NewComment,
    ) -> Result<Comment, CollaboratorError> {
        let mut state = self.state.lock().await;
        if !state.conversations.contains_key(id) {
            return Err(CollaboratorError::NotFound(id.to_string()));
        }
        let stored = Comment {
            id: CommentId::new(Uuid::new_v4().to_string()),
            conversation_id: id.clone(),
            author_id: comment.author_id.clone(),
            author_name: comment.author_name.clone(),
            text: comment.text.clone(),
            created_at: Utc::now(),
        };
        state
            .comments
            .entry(id.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl ConnectionsDirectory for MemoryStore {
    async fn list_connections(&self, _user: &UserId) -> Result<Connections, CollaboratorError> {
        Ok(self.state.lock().await.connections.clone())
    }
}

#[derive(Debug, Default)]
struct TransportState {
    sent: Vec<OutgoingMessage>,
    attempts: usize,
    failures: VecDeque<String>,
    delay: Option<Duration>,
}

/// Transport that keeps what it is asked to send.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    state: Mutex<TransportState>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successfully sent payloads.
    pub async fn sent(&self) -> Vec<OutgoingMessage> {
        self.state.lock().await.sent.clone()
    }

    /// Every call, failed ones included.
    pub async fn attempts(&self) -> usize {
        self.state.lock().await.attempts
    }

    pub async fn fail_next(&self, reason: &str) {
        self.state
            .lock()
            .await
            .failures
            .push_back(reason.to_string());
    }

    pub async fn set_delay(&self, delay: Duration) {
        self.state.lock().await.delay = Some(delay);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), CollaboratorError> {
        let delay = {
            let mut state = self.state.lock().await;
            state.attempts += 1;
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if let Some(reason) = state.failures.pop_front() {
            return Err(CollaboratorError::Transport(reason));
        }
        state.sent.push(message.clone());
        Ok(())
    }
}

/// Identity fixed at construction.
#[derive(Debug, Clone)]
pub struct StaticIdentity(Identity);

impl StaticIdentity {
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self(Identity::new(user_id, display_name))
    }
}

impl IdentityProvider for StaticIdentity {
    fn current(&self) -> Identity {
        self.0.clone()
    }
}
