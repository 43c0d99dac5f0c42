use async_trait::async_trait;
use flowbox_core::{
    Comment, Connections, Conversation, ConversationId, ConversationUpdate, Identity, Message,
    NewComment, OutgoingMessage, UserId,
};
use thiserror::Error;

/// Failure reported by an external collaborator, classified so the engine
/// can decide between retrying, rolling back and surfacing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Remote source of truth for conversations and their messages.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Conversations the user owns or participates in.
    async fn list_conversations(&self, user: &UserId)
        -> Result<Vec<Conversation>, CollaboratorError>;

    /// Each present field group in `update` replaces the stored value.
    async fn update_conversation(
        &self,
        id: &ConversationId,
        update: &ConversationUpdate,
    ) -> Result<Conversation, CollaboratorError>;

    async fn list_messages(&self, id: &ConversationId) -> Result<Vec<Message>, CollaboratorError>;

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn list_comments(&self, id: &ConversationId) -> Result<Vec<Comment>, CollaboratorError>;

    async fn add_comment(
        &self,
        id: &ConversationId,
        comment: &NewComment,
    ) -> Result<Comment, CollaboratorError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait ConnectionsDirectory: Send + Sync {
    async fn list_connections(&self, user: &UserId) -> Result<Connections, CollaboratorError>;
}

pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Identity;
}
