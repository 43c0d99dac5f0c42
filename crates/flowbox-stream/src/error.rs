use crate::CollaboratorError;
use flowbox_core::ConversationId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("fetch failed: {0}")]
    TransientFetch(#[source] CollaboratorError),
    #[error("edit of {conversation_id} was rejected: {source}")]
    Validation {
        conversation_id: ConversationId,
        #[source]
        source: CollaboratorError,
    },
    #[error("sending reply in {conversation_id} failed: {source}")]
    SendFailure {
        conversation_id: ConversationId,
        #[source]
        source: CollaboratorError,
    },
    #[error("a reply is already queued for {0}")]
    SendAlreadyQueued(ConversationId),
    #[error("no queued reply for {0}")]
    NothingQueued(ConversationId),
    #[error("no failed draft for {0}")]
    NoDraft(ConversationId),
    #[error("unknown conversation {0}")]
    UnknownConversation(ConversationId),
    #[error("the owner of {0} cannot be removed from its participants")]
    OwnerRequired(ConversationId),
    #[error("no recipients could be resolved for {0}")]
    EmptyRecipients(ConversationId),
    #[error("invalid recipient {0:?}")]
    InvalidRecipient(String),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}
