use crate::backend::ConversationStore;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use flowbox_config::SyncConfig;
use flowbox_core::{Conversation, ConversationId, ConversationUpdate, Message, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct CacheState {
    /// Last values the store reported or confirmed.
    authoritative: Vec<Conversation>,
    /// Unconfirmed edits, applied on read.
    overlay: HashMap<ConversationId, ConversationUpdate>,
    /// Conversations with a queued reply keep their local record.
    holds: HashMap<ConversationId, usize>,
    messages: HashMap<ConversationId, Vec<Message>>,
    epoch: u64,
    confirmed_at: HashMap<ConversationId, u64>,
}

impl CacheState {
    fn position(&self, id: &ConversationId) -> Option<usize> {
        self.authoritative.iter().position(|c| &c.id == id)
    }

    fn keeps_local(&self, id: &ConversationId, fetched_after: u64) -> bool {
        self.holds.contains_key(id)
            || self
                .confirmed_at
                .get(id)
                .map(|epoch| *epoch > fetched_after)
                .unwrap_or(false)
    }

    fn effective(&self, conversation: &Conversation) -> Conversation {
        let mut effective = conversation.clone();
        if let Some(update) = self.overlay.get(&conversation.id) {
            update.apply_to(&mut effective);
        }
        effective
    }
}

/// Outcome of merging one poll result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub conversations: usize,
    /// Records where the local value won over the polled one.
    pub kept_local: usize,
}

/// Two-layer conversation store: the authoritative snapshot plus an overlay
/// of in-flight edits keyed by conversation id.
#[derive(Debug, Default)]
pub struct ConversationCache {
    state: RwLock<CacheState>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every conversation with pending edits applied.
    pub async fn snapshot(&self) -> Vec<Conversation> {
        let state = self.state.read().await;
        state
            .authoritative
            .iter()
            .map(|conversation| state.effective(conversation))
            .collect()
    }

    pub async fn get(&self, id: &ConversationId) -> Option<Conversation> {
        let state = self.state.read().await;
        state
            .position(id)
            .map(|index| state.effective(&state.authoritative[index]))
    }

    /// Marker taken before a fetch so the merge can tell which local
    /// confirmations the fetched data predates.
    pub async fn epoch(&self) -> u64 {
        self.state.read().await.epoch
    }

    pub async fn begin_edit(&self, id: &ConversationId, update: ConversationUpdate) {
        self.state.write().await.overlay.insert(id.clone(), update);
    }

    /// Replaces the local record with the store's response and drops the
    /// overlay entry.
    pub async fn confirm_edit(&self, confirmed: Conversation) {
        let mut state = self.state.write().await;
        state.overlay.remove(&confirmed.id);
        state.epoch += 1;
        let epoch = state.epoch;
        state.confirmed_at.insert(confirmed.id.clone(), epoch);
        match state.position(&confirmed.id) {
            Some(index) => state.authoritative[index] = confirmed,
            None => state.authoritative.push(confirmed),
        }
    }

    /// Drops the overlay entry; reads fall back to the last known-good value.
    pub async fn rollback_edit(&self, id: &ConversationId) {
        self.state.write().await.overlay.remove(id);
    }

    pub async fn has_pending_edit(&self, id: &ConversationId) -> bool {
        self.state.read().await.overlay.contains_key(id)
    }

    pub async fn hold(&self, id: &ConversationId) {
        *self.state.write().await.holds.entry(id.clone()).or_default() += 1;
    }

    pub async fn release(&self, id: &ConversationId) {
        let mut state = self.state.write().await;
        if let Some(count) = state.holds.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                state.holds.remove(id);
            }
        }
    }

    pub async fn is_held(&self, id: &ConversationId) -> bool {
        self.state.read().await.holds.contains_key(id)
    }

    /// Merges a polled list fetched after `fetched_after` was read.
    ///
    /// Polled values replace local ones except for conversations that are
    /// held by a queued reply or whose edit was confirmed after the fetch
    /// started. Conversations missing from the poll are dropped unless one
    /// of those rules keeps them. Unconfirmed edits stay in the overlay and
    /// keep shadowing the polled fields until they resolve.
    pub async fn merge_remote(
        &self,
        remote: Vec<Conversation>,
        fetched_after: u64,
    ) -> MergeReport {
        let mut state = self.state.write().await;
        let previous = std::mem::take(&mut state.authoritative)
            .into_iter()
            .map(|conversation| (conversation.id.clone(), conversation))
            .collect::<HashMap<_, _>>();

        let mut report = MergeReport::default();
        let mut seen = HashSet::new();
        let mut merged = Vec::with_capacity(remote.len());

        for polled in remote {
            if !seen.insert(polled.id.clone()) {
                continue;
            }
            match previous.get(&polled.id) {
                Some(local) if state.keeps_local(&polled.id, fetched_after) => {
                    if local != &polled {
                        report.kept_local += 1;
                    }
                    merged.push(local.clone());
                }
                _ => merged.push(polled),
            }
        }

        for (id, local) in previous {
            if !seen.contains(&id) && state.keeps_local(&id, fetched_after) {
                report.kept_local += 1;
                merged.push(local);
            }
        }

        let live = merged.iter().map(|c| c.id.clone()).collect::<HashSet<_>>();
        state.messages.retain(|id, _| live.contains(id));
        state.confirmed_at.retain(|_, epoch| *epoch > fetched_after);

        report.conversations = merged.len();
        state.authoritative = merged;
        report
    }

    /// Drops a conversation after a hard delete.
    pub async fn remove(&self, id: &ConversationId) -> bool {
        let mut state = self.state.write().await;
        state.overlay.remove(id);
        state.messages.remove(id);
        state.confirmed_at.remove(id);
        let before = state.authoritative.len();
        state.authoritative.retain(|conversation| &conversation.id != id);
        before != state.authoritative.len()
    }

    pub async fn set_messages(&self, id: &ConversationId, mut messages: Vec<Message>) {
        messages.sort_by_key(|message| message.sent_at);
        self.state.write().await.messages.insert(id.clone(), messages);
    }

    pub async fn messages(&self, id: &ConversationId) -> Option<Vec<Message>> {
        self.state.read().await.messages.get(id).cloned()
    }
}

/// Doubles the poll delay after each consecutive failure, capped.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl PollBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: 0,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.poll_interval(), config.backoff_max())
    }

    pub fn delay(&self) -> Duration {
        let factor = 1_u32.checked_shl(self.failures).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }

    /// Records a failure and returns the delay before the next attempt.
    pub fn failed(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.delay()
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Refreshes the cache from the conversation store.
#[derive(Clone)]
pub struct SyncCoordinator {
    store: Arc<dyn ConversationStore>,
    cache: Arc<ConversationCache>,
    events: EventBus,
    config: SyncConfig,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        cache: Arc<ConversationCache>,
        events: EventBus,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            cache,
            events,
            config,
        }
    }

    /// One poll. On failure the cache is left as it was.
    pub async fn refresh(&self, user: &UserId) -> Result<MergeReport, EngineError> {
        let fetched_after = self.cache.epoch().await;
        let remote = self.store.list_conversations(user).await.map_err(|err| {
            tracing::warn!(user_id = %user, error = %err, "conversation poll failed");
            EngineError::TransientFetch(err)
        })?;

        let report = self.cache.merge_remote(remote, fetched_after).await;
        tracing::debug!(
            user_id = %user,
            conversations = report.conversations,
            kept_local = report.kept_local,
            "conversation poll merged"
        );
        self.events.publish(EngineEvent::SyncCompleted {
            conversations: report.conversations,
            kept_local: report.kept_local,
        });
        Ok(report)
    }

    /// Polls immediately, then on the configured interval until aborted.
    pub async fn run_poll_loop(self, user: UserId) {
        let mut backoff = PollBackoff::from_config(&self.config);
        tracing::info!(
            user_id = %user,
            interval_secs = self.config.poll_interval_secs,
            "conversation polling started"
        );

        loop {
            let delay = match self.refresh(&user).await {
                Ok(_) => {
                    backoff.reset();
                    backoff.delay()
                }
                Err(err) => {
                    let delay = backoff.failed();
                    tracing::warn!(
                        attempt = backoff.failures(),
                        retry_in_secs = delay.as_secs(),
                        "poll will retry"
                    );
                    self.events.publish(EngineEvent::SyncFailed {
                        error: err.to_string(),
                        retry_in_secs: delay.as_secs(),
                    });
                    delay
                }
            };
            tokio::time::sleep(delay).await;
        }
    }

    /// Fetches a conversation's messages in timestamp order. Falls back to
    /// the cached copy when the fetch fails.
    pub async fn load_messages(&self, id: &ConversationId) -> Result<Vec<Message>, EngineError> {
        match self.store.list_messages(id).await {
            Ok(messages) => {
                self.cache.set_messages(id, messages).await;
                Ok(self.cache.messages(id).await.unwrap_or_default())
            }
            Err(err) => {
                tracing::warn!(conversation_id = %id, error = %err, "message fetch failed");
                match self.cache.messages(id).await {
                    Some(cached) => Ok(cached),
                    None => Err(EngineError::TransientFetch(err)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use flowbox_core::{Channel, ConversationStatus};

    fn conversation(id: &str) -> Conversation {
        Conversation::new(id, "u1", Channel::Email, format!("{id}@x.com"))
    }

    fn status_update(status: ConversationStatus) -> ConversationUpdate {
        ConversationUpdate {
            status: Some(status),
            ..ConversationUpdate::default()
        }
    }

    #[tokio::test]
    async fn overlay_shadows_polled_value_until_confirmed() {
        let cache = ConversationCache::new();
        cache.merge_remote(vec![conversation("c1")], 0).await;

        let id = ConversationId::from("c1");
        cache
            .begin_edit(&id, status_update(ConversationStatus::Resolved))
            .await;

        // A poll that still reports the old status does not undo the edit.
        let epoch = cache.epoch().await;
        cache.merge_remote(vec![conversation("c1")], epoch).await;
        assert_eq!(
            cache.get(&id).await.map(|c| c.status),
            Some(ConversationStatus::Resolved)
        );

        cache.rollback_edit(&id).await;
        assert_eq!(
            cache.get(&id).await.map(|c| c.status),
            Some(ConversationStatus::Open)
        );
    }

    #[tokio::test]
    async fn stale_poll_does_not_overwrite_confirmed_edit() {
        let cache = ConversationCache::new();
        cache.merge_remote(vec![conversation("c1")], 0).await;

        let fetched_after = cache.epoch().await;
        let mut confirmed = conversation("c1");
        confirmed.status = ConversationStatus::Waiting;
        cache.confirm_edit(confirmed).await;

        let report = cache
            .merge_remote(vec![conversation("c1")], fetched_after)
            .await;
        assert_eq!(report.kept_local, 1);
        assert_eq!(
            cache.get(&ConversationId::from("c1")).await.map(|c| c.status),
            Some(ConversationStatus::Waiting)
        );

        // The next poll started after the confirmation is authoritative again.
        let epoch = cache.epoch().await;
        cache.merge_remote(vec![conversation("c1")], epoch).await;
        assert_eq!(
            cache.get(&ConversationId::from("c1")).await.map(|c| c.status),
            Some(ConversationStatus::Open)
        );
    }

    #[tokio::test]
    async fn held_conversation_survives_missing_from_poll() {
        let cache = ConversationCache::new();
        cache
            .merge_remote(vec![conversation("c1"), conversation("c2")], 0)
            .await;
        cache.hold(&ConversationId::from("c1")).await;

        let report = cache.merge_remote(Vec::new(), 0).await;
        assert_eq!(report.conversations, 1);
        assert!(cache.get(&ConversationId::from("c1")).await.is_some());
        assert!(cache.get(&ConversationId::from("c2")).await.is_none());

        cache.release(&ConversationId::from("c1")).await;
        cache.merge_remote(Vec::new(), 0).await;
        assert!(cache.snapshot().await.is_empty());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = PollBackoff::new(Duration::from_secs(30), Duration::from_secs(300));
        assert_eq!(backoff.delay(), Duration::from_secs(30));
        assert_eq!(backoff.failed(), Duration::from_secs(60));
        assert_eq!(backoff.failed(), Duration::from_secs(120));
        assert_eq!(backoff.failed(), Duration::from_secs(240));
        assert_eq!(backoff.failed(), Duration::from_secs(300));
        for _ in 0..64 {
            backoff.failed();
        }
        assert_eq!(backoff.delay(), Duration::from_secs(300));
        backoff.reset();
        assert_eq!(backoff.delay(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_existing_state() {
        let store = Arc::new(MemoryStore::new());
        store.insert_conversation(conversation("c1")).await;
        let cache = Arc::new(ConversationCache::new());
        let sync = SyncCoordinator::new(
            store.clone(),
            cache.clone(),
            EventBus::new(),
            SyncConfig::default(),
        );
        let user = UserId::from("u1");

        sync.refresh(&user).await.expect("first poll");
        store.fail_next_list("backend down").await;
        let err = sync.refresh(&user).await.expect_err("second poll fails");

        assert!(matches!(err, EngineError::TransientFetch(_)));
        assert_eq!(cache.snapshot().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_backs_off_after_failures() {
        let store = Arc::new(MemoryStore::new());
        store.insert_conversation(conversation("c1")).await;
        store.fail_next_list("down").await;
        store.fail_next_list("still down").await;

        let events = EventBus::new();
        let mut rx = events.subscribe();
        let sync = SyncCoordinator::new(
            store.clone(),
            Arc::new(ConversationCache::new()),
            events,
            SyncConfig {
                poll_interval_secs: 10,
                backoff_max_secs: 300,
            },
        );
        let task = tokio::spawn(sync.run_poll_loop(UserId::from("u1")));

        let mut retries = Vec::new();
        loop {
            match rx.recv().await.expect("event") {
                EngineEvent::SyncFailed { retry_in_secs, .. } => retries.push(retry_in_secs),
                EngineEvent::SyncCompleted { conversations, .. } => {
                    assert_eq!(conversations, 1);
                    break;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        task.abort();

        assert_eq!(retries, vec![20, 40]);
        assert_eq!(store.list_calls().await, 3);
    }
}
