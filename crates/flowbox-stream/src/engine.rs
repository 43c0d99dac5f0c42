use crate::account::{selectable_accounts, AccountOption};
use crate::backend::{CommentStore, ConnectionsDirectory, ConversationStore, Transport};
use crate::compose::{assemble_reply, ReplyDraft};
use crate::edits::EditCoordinator;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::filter::visible_conversation_ids;
use crate::memory::{MemoryStore, RecordingTransport};
use crate::scheduler::{Scheduler, TaskKey};
use crate::send::{DelayedSender, SendPhase, SendState};
use crate::sync::{ConversationCache, MergeReport, SyncCoordinator};
use crate::tags::{TagEdit, TagSet, TagVocabulary};
use crate::thread::{build_thread, ThreadMessage};
use flowbox_config::AppConfig;
use flowbox_core::{
    Comment, Conversation, ConversationId, ConversationStatus, FilterState, Identity, MessageId,
    NewComment, PrimaryTag, UserId,
};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, RwLock};

/// The external services the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub conversations: Arc<dyn ConversationStore>,
    pub comments: Arc<dyn CommentStore>,
    pub connections: Arc<dyn ConnectionsDirectory>,
    pub transport: Arc<dyn Transport>,
}

impl Collaborators {
    /// Everything served from one in-memory store.
    pub fn in_memory(store: Arc<MemoryStore>, transport: Arc<RecordingTransport>) -> Self {
        Self {
            conversations: store.clone(),
            comments: store.clone(),
            connections: store,
            transport,
        }
    }
}

/// Conversation stream engine. The caller's identity is passed into every
/// operation that depends on it.
pub struct InboxEngine {
    collaborators: Collaborators,
    cache: Arc<ConversationCache>,
    sync: SyncCoordinator,
    edits: EditCoordinator,
    sender: DelayedSender,
    scheduler: Arc<Scheduler>,
    events: EventBus,
    vocabulary: TagVocabulary,
    discussions: RwLock<Option<Vec<ConversationId>>>,
    polling_for: Mutex<Option<UserId>>,
}

impl InboxEngine {
    pub fn new(collaborators: Collaborators, config: &AppConfig) -> Self {
        let cache = Arc::new(ConversationCache::new());
        let events = EventBus::new();
        let scheduler = Scheduler::new();

        let sync = SyncCoordinator::new(
            collaborators.conversations.clone(),
            cache.clone(),
            events.clone(),
            config.sync.clone(),
        );
        let edits = EditCoordinator::new(
            collaborators.conversations.clone(),
            cache.clone(),
            events.clone(),
        );
        let sender = DelayedSender::new(
            collaborators.transport.clone(),
            cache.clone(),
            events.clone(),
            scheduler.clone(),
            config.send.clone(),
        );

        Self {
            collaborators,
            cache,
            sync,
            edits,
            sender,
            scheduler,
            events,
            vocabulary: TagVocabulary::new(&config.taxonomy.secondary_suggestions),
            discussions: RwLock::new(None),
            polling_for: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub async fn refresh(&self, identity: &Identity) -> Result<MergeReport, EngineError> {
        self.sync.refresh(&identity.user_id).await
    }

    /// Polling runs only while the inbox is on screen. Activating it for a
    /// different user restarts the loop for that user.
    pub fn set_inbox_active(&self, identity: &Identity, active: bool) {
        let mut polling_for = self
            .polling_for
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if active {
            let running = self.scheduler.is_scheduled(&TaskKey::Poll);
            if running && polling_for.as_ref() == Some(&identity.user_id) {
                return;
            }
            if running {
                tracing::info!(
                    previous = ?polling_for.as_ref().map(UserId::as_str),
                    user_id = %identity.user_id,
                    "restarting conversation polling for another user"
                );
            }
            // Scheduling under the same key aborts the previous loop.
            self.scheduler.schedule(
                TaskKey::Poll,
                self.sync.clone().run_poll_loop(identity.user_id.clone()),
            );
            *polling_for = Some(identity.user_id.clone());
        } else {
            *polling_for = None;
            if self.scheduler.cancel(&TaskKey::Poll) {
                tracing::info!(user_id = %identity.user_id, "conversation polling suspended");
            }
        }
    }

    pub fn is_polling(&self) -> bool {
        self.scheduler.is_scheduled(&TaskKey::Poll)
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.cache.snapshot().await
    }

    pub async fn conversation(&self, id: &ConversationId) -> Option<Conversation> {
        self.cache.get(id).await
    }

    /// Replaces the externally curated list backing the discussions view.
    pub async fn set_discussions(&self, ids: Option<Vec<ConversationId>>) {
        *self.discussions.write().await = ids;
    }

    pub async fn visible_ids(
        &self,
        identity: &Identity,
        filter: &FilterState,
    ) -> Vec<ConversationId> {
        let conversations = self.cache.snapshot().await;
        let discussions = self.discussions.read().await;
        visible_conversation_ids(
            &conversations,
            filter,
            &identity.user_id,
            discussions.as_deref(),
        )
    }

    /// Messages of one conversation, ordered and ready for display, with the
    /// pending reply's stand-in last.
    pub async fn open_thread(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<ThreadMessage>, EngineError> {
        if self.cache.get(id).await.is_none() {
            return Err(EngineError::UnknownConversation(id.clone()));
        }
        let messages = self.sync.load_messages(id).await?;
        let ephemeral = self.sender.ephemeral(id).await;
        Ok(build_thread(messages, ephemeral))
    }

    pub async fn set_primary_tag(
        &self,
        id: &ConversationId,
        tag: Option<PrimaryTag>,
    ) -> Result<Conversation, EngineError> {
        self.edits.edit_tags(id, TagEdit::SetPrimary(tag)).await
    }

    /// An empty tag clears every secondary tag.
    pub async fn toggle_secondary_tag(
        &self,
        id: &ConversationId,
        tag: &str,
    ) -> Result<Conversation, EngineError> {
        self.edits
            .edit_tags(id, TagEdit::ToggleSecondary(tag.to_string()))
            .await
    }

    pub async fn soft_delete(&self, id: &ConversationId) -> Result<Conversation, EngineError> {
        self.edits.set_deleted(id, true).await
    }

    pub async fn restore(&self, id: &ConversationId) -> Result<Conversation, EngineError> {
        self.edits.set_deleted(id, false).await
    }

    pub async fn set_status(
        &self,
        id: &ConversationId,
        status: ConversationStatus,
    ) -> Result<Conversation, EngineError> {
        self.edits.set_status(id, status).await
    }

    pub async fn share_with(
        &self,
        id: &ConversationId,
        user: &UserId,
    ) -> Result<Conversation, EngineError> {
        self.edits.share_with(id, user).await
    }

    pub async fn unshare(
        &self,
        id: &ConversationId,
        user: &UserId,
    ) -> Result<Conversation, EngineError> {
        self.edits.unshare(id, user).await
    }

    /// Permanently removes a conversation. A reply still counting down is
    /// cancelled first; one already being sent blocks the delete.
    pub async fn hard_delete(&self, id: &ConversationId) -> Result<(), EngineError> {
        match self.sender.state(id).await.map(|state| state.phase) {
            Some(SendPhase::Queued { .. }) => self.sender.cancel(id).await?,
            Some(SendPhase::Committing) => {
                return Err(EngineError::SendAlreadyQueued(id.clone()));
            }
            Some(SendPhase::Failed { .. }) => self.sender.discard(id).await?,
            None => {}
        }

        self.collaborators
            .conversations
            .delete_conversation(id)
            .await?;
        self.cache.remove(id).await;
        self.edits.forget(id);
        tracing::info!(conversation_id = %id, "conversation deleted");
        Ok(())
    }

    pub async fn tag_suggestions(
        &self,
        id: &ConversationId,
        prefix: &str,
    ) -> Result<Vec<String>, EngineError> {
        let conversation = self
            .cache
            .get(id)
            .await
            .ok_or_else(|| EngineError::UnknownConversation(id.clone()))?;
        Ok(self.vocabulary.suggest(prefix, &TagSet::of(&conversation)))
    }

    /// Resolves recipients and subject, then starts the undo countdown.
    pub async fn queue_reply(&self, draft: ReplyDraft) -> Result<MessageId, EngineError> {
        let id = draft.conversation_id.clone();
        let conversation = self
            .cache
            .get(&id)
            .await
            .ok_or_else(|| EngineError::UnknownConversation(id.clone()))?;
        let messages = match self.cache.messages(&id).await {
            Some(messages) => messages,
            None => self.sync.load_messages(&id).await?,
        };

        let payload = assemble_reply(&conversation, &messages, &draft)?;
        self.sender.queue(&id, payload).await
    }

    pub async fn undo_send(&self, id: &ConversationId) -> Result<(), EngineError> {
        self.sender.cancel(id).await
    }

    pub async fn retry_send(&self, id: &ConversationId) -> Result<MessageId, EngineError> {
        self.sender.retry(id).await
    }

    pub async fn discard_draft(&self, id: &ConversationId) -> Result<(), EngineError> {
        self.sender.discard(id).await
    }

    pub async fn send_state(&self, id: &ConversationId) -> Option<SendState> {
        self.sender.state(id).await
    }

    pub async fn comments(&self, id: &ConversationId) -> Result<Vec<Comment>, EngineError> {
        let mut comments = self.collaborators.comments.list_comments(id).await?;
        comments.sort_by_key(|comment| comment.created_at);
        Ok(comments)
    }

    pub async fn add_comment(
        &self,
        identity: &Identity,
        id: &ConversationId,
        text: &str,
    ) -> Result<Comment, EngineError> {
        let comment = NewComment {
            author_id: identity.user_id.clone(),
            author_name: identity.display_name.clone(),
            text: text.trim().to_string(),
        };
        Ok(self.collaborators.comments.add_comment(id, &comment).await?)
    }

    pub async fn selectable_accounts(
        &self,
        identity: &Identity,
    ) -> Result<Vec<AccountOption>, EngineError> {
        let connections = self
            .collaborators
            .connections
            .list_connections(&identity.user_id)
            .await?;
        Ok(selectable_accounts(&connections))
    }

    /// Stops polling and cancels replies still counting down.
    pub async fn shutdown(&self) {
        self.scheduler.cancel(&TaskKey::Poll);
        *self
            .polling_for
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        let cancelled = self.sender.cancel_all().await;
        self.scheduler.cancel_all();
        tracing::info!(cancelled_replies = cancelled, "inbox engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::IdentityProvider;
    use crate::memory::StaticIdentity;
    use flowbox_core::{Channel, ViewSelector};

    async fn engine() -> (InboxEngine, Arc<MemoryStore>, Identity) {
        engine_with(Conversation::new("c1", "u1", Channel::Email, "a@x.com")).await
    }

    async fn engine_with(conversation: Conversation) -> (InboxEngine, Arc<MemoryStore>, Identity) {
        let store = Arc::new(MemoryStore::new());
        store.insert_conversation(conversation).await;
        let engine = InboxEngine::new(
            Collaborators::in_memory(store.clone(), Arc::new(RecordingTransport::new())),
            &AppConfig::default(),
        );
        let identity = StaticIdentity::new("u1", "Uma").current();
        engine.refresh(&identity).await.expect("refreshed");
        (engine, store, identity)
    }

    #[tokio::test]
    async fn soft_delete_moves_conversation_to_deleted_view() {
        let (engine, _, identity) = engine().await;
        let id = ConversationId::from("c1");

        engine.soft_delete(&id).await.expect("deleted");
        let owned = engine.visible_ids(&identity, &FilterState::default()).await;
        assert!(owned.is_empty());

        let deleted_view = FilterState {
            view: ViewSelector::Deleted,
            ..FilterState::default()
        };
        assert_eq!(engine.visible_ids(&identity, &deleted_view).await, vec![id.clone()]);

        // Deleting twice does not toggle it back.
        engine.soft_delete(&id).await.expect("still deleted");
        assert_eq!(engine.visible_ids(&identity, &deleted_view).await, vec![id.clone()]);

        engine.restore(&id).await.expect("restored");
        assert_eq!(
            engine.visible_ids(&identity, &FilterState::default()).await,
            vec![id]
        );
    }

    #[tokio::test]
    async fn tag_edits_keep_stored_spelling() {
        let mut conversation = Conversation::new("c1", "u1", Channel::Email, "a@x.com");
        conversation.secondary_tags.insert("VIP".to_string());
        let (engine, store, identity) = engine_with(conversation).await;
        let id = ConversationId::from("c1");
        let stored_tags =
            |stored: Option<Conversation>| stored.map(|c| c.secondary_tags).unwrap_or_default();
        let original = stored_tags(store.conversation(&id).await);

        engine
            .set_primary_tag(&id, Some(PrimaryTag::Support))
            .await
            .expect("primary set");
        assert_eq!(stored_tags(store.conversation(&id).await), original);

        engine.soft_delete(&id).await.expect("deleted");
        engine.restore(&id).await.expect("restored");
        assert_eq!(stored_tags(store.conversation(&id).await), original);
    }

    #[tokio::test]
    async fn capitalized_reserved_tag_hides_the_conversation() {
        let mut conversation = Conversation::new("c1", "u1", Channel::Email, "a@x.com");
        conversation.secondary_tags.insert("Deleted".to_string());
        let (engine, _, identity) = engine_with(conversation).await;
        let id = ConversationId::from("c1");
        let deleted_view = FilterState {
            view: ViewSelector::Deleted,
            ..FilterState::default()
        };

        assert!(engine
            .visible_ids(&identity, &FilterState::default())
            .await
            .is_empty());
        assert_eq!(engine.visible_ids(&identity, &deleted_view).await, vec![id.clone()]);

        engine.restore(&id).await.expect("restored");
        assert_eq!(
            engine.visible_ids(&identity, &FilterState::default()).await,
            vec![id]
        );
    }

    #[tokio::test]
    async fn comments_carry_the_callers_identity() {
        let (engine, _, identity) = engine().await;
        let id = ConversationId::from("c1");
        engine
            .add_comment(&identity, &id, "  call them back  ")
            .await
            .expect("added");

        let comments = engine.comments(&id).await.expect("listed");
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].author_name, "Uma");
        assert_eq!(comments[0].text, "call them back");
    }

    #[tokio::test]
    async fn hard_delete_removes_from_cache() {
        let (engine, store, _) = engine().await;
        let id = ConversationId::from("c1");
        engine.hard_delete(&id).await.expect("deleted");
        assert!(engine.conversation(&id).await.is_none());
        assert!(store.conversation(&id).await.is_none());
        assert!(matches!(
            engine.hard_delete(&id).await,
            Err(EngineError::Collaborator(_))
        ));
    }

    #[tokio::test]
    async fn suggestions_skip_tags_already_present() {
        let (engine, _, _) = engine().await;
        let id = ConversationId::from("c1");
        engine.toggle_secondary_tag(&id, "vip").await.expect("tagged");
        let suggestions = engine.tag_suggestions(&id, "").await.expect("suggested");
        assert!(!suggestions.contains(&"vip".to_string()));
        assert!(suggestions.contains(&"urgent".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn polling_follows_the_active_user() {
        let (engine, store, first) = engine().await;
        store
            .insert_conversation(Conversation::new("c2", "u2", Channel::Email, "b@x.com"))
            .await;
        let second = StaticIdentity::new("u2", "Ravi").current();
        let cached = |conversations: Vec<Conversation>| {
            conversations
                .into_iter()
                .map(|c| c.id.as_str().to_string())
                .collect::<Vec<_>>()
        };

        engine.set_inbox_active(&first, true);
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(cached(engine.conversations().await), vec!["c1"]);

        engine.set_inbox_active(&second, true);
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert!(engine.is_polling());
        assert_eq!(cached(engine.conversations().await), vec!["c2"]);

        // Same user again keeps the running loop.
        let polled = store.list_calls().await;
        engine.set_inbox_active(&second, true);
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(store.list_calls().await, polled);
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_the_inbox_stops_polling() {
        let (engine, store, identity) = engine().await;
        engine.set_inbox_active(&identity, true);
        assert!(engine.is_polling());
        tokio::time::sleep(std::time::Duration::from_secs(65)).await;
        let polled = store.list_calls().await;
        assert!(polled >= 3);

        engine.set_inbox_active(&identity, false);
        assert!(!engine.is_polling());
        tokio::time::sleep(std::time::Duration::from_secs(600)).await;
        assert_eq!(store.list_calls().await, polled);
    }
}
