use crate::backend::ConversationStore;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::sync::ConversationCache;
use crate::tags::{TagEdit, TagSet};
use flowbox_core::{Conversation, ConversationId, ConversationStatus, ConversationUpdate, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Applies conversation edits optimistically, one at a time per
/// conversation, and reconciles them with the store's answer.
pub struct EditCoordinator {
    store: Arc<dyn ConversationStore>,
    cache: Arc<ConversationCache>,
    events: EventBus,
    locks: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
}

impl EditCoordinator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        cache: Arc<ConversationCache>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            cache,
            events,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, id: &ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_default()
            .clone()
    }

    pub(crate) fn forget(&self, id: &ConversationId) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Waits for earlier edits of the same conversation, builds the update
    /// from the state they left, shows it locally, then sends it. A refused
    /// update restores the previous value and surfaces as `Validation`.
    pub async fn apply<F>(
        &self,
        id: &ConversationId,
        build: F,
    ) -> Result<Conversation, EngineError>
    where
        F: FnOnce(&Conversation) -> Result<ConversationUpdate, EngineError>,
    {
        let lock = self.lock_for(id);
        let _serialized = lock.lock().await;

        let current = self
            .cache
            .get(id)
            .await
            .ok_or_else(|| EngineError::UnknownConversation(id.clone()))?;
        let update = build(&current)?;
        if update.is_empty() {
            return Ok(current);
        }

        self.cache.begin_edit(id, update.clone()).await;
        match self.store.update_conversation(id, &update).await {
            Ok(confirmed) => {
                tracing::debug!(conversation_id = %id, "edit confirmed");
                self.cache.confirm_edit(confirmed.clone()).await;
                Ok(confirmed)
            }
            Err(err) => {
                self.cache.rollback_edit(id).await;
                tracing::warn!(conversation_id = %id, error = %err, "edit rejected, rolled back");
                self.events.publish(EngineEvent::EditRolledBack {
                    conversation_id: id.clone(),
                    error: err.to_string(),
                });
                Err(EngineError::Validation {
                    conversation_id: id.clone(),
                    source: err,
                })
            }
        }
    }

    /// Every tag edit resends the full (primary, secondary) pair.
    pub async fn edit_tags(
        &self,
        id: &ConversationId,
        edit: TagEdit,
    ) -> Result<Conversation, EngineError> {
        self.apply(id, move |current| {
            let mut tags = TagSet::of(current);
            edit.apply(&mut tags);
            Ok(ConversationUpdate {
                tags: Some(tags.into_replacement()),
                ..ConversationUpdate::default()
            })
        })
        .await
    }

    /// Soft delete or restore. A conversation already in the requested
    /// state is left alone; otherwise the reserved tag is toggled.
    pub async fn set_deleted(
        &self,
        id: &ConversationId,
        deleted: bool,
    ) -> Result<Conversation, EngineError> {
        self.apply(id, move |current| {
            let mut tags = TagSet::of(current);
            if tags.is_deleted() == deleted {
                return Ok(ConversationUpdate::default());
            }
            TagEdit::toggle_deleted().apply(&mut tags);
            Ok(ConversationUpdate {
                tags: Some(tags.into_replacement()),
                ..ConversationUpdate::default()
            })
        })
        .await
    }

    pub async fn set_status(
        &self,
        id: &ConversationId,
        status: ConversationStatus,
    ) -> Result<Conversation, EngineError> {
        self.apply(id, move |current| {
            if current.status == status {
                return Ok(ConversationUpdate::default());
            }
            Ok(ConversationUpdate {
                status: Some(status),
                ..ConversationUpdate::default()
            })
        })
        .await
    }

    pub async fn share_with(
        &self,
        id: &ConversationId,
        user: &UserId,
    ) -> Result<Conversation, EngineError> {
        self.apply(id, |current| {
            if current.has_participant(user) {
                return Ok(ConversationUpdate::default());
            }
            let mut participants = current.participants.clone();
            participants.insert(user.clone());
            participants.insert(current.owner_id.clone());
            Ok(ConversationUpdate {
                participants: Some(participants),
                ..ConversationUpdate::default()
            })
        })
        .await
    }

    /// The owner can never be removed.
    pub async fn unshare(
        &self,
        id: &ConversationId,
        user: &UserId,
    ) -> Result<Conversation, EngineError> {
        self.apply(id, |current| {
            if current.is_owned_by(user) {
                return Err(EngineError::OwnerRequired(current.id.clone()));
            }
            if !current.has_participant(user) {
                return Ok(ConversationUpdate::default());
            }
            let mut participants = current.participants.clone();
            participants.remove(user);
            participants.insert(current.owner_id.clone());
            Ok(ConversationUpdate {
                participants: Some(participants),
                ..ConversationUpdate::default()
            })
        })
        .await
    }
}
