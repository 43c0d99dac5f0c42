use crate::backend::Transport;
use crate::compose::ephemeral_message;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::scheduler::{Scheduler, TaskKey};
use crate::sync::ConversationCache;
use chrono::Utc;
use flowbox_config::SendConfig;
use flowbox_core::{ConversationId, Message, MessageId, OutgoingMessage};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SendPhase {
    Queued { remaining: u32 },
    /// Handed to the transport; too late to undo.
    Committing,
    /// The transport refused it. Payload and stand-in are kept for a retry.
    Failed { error: String },
}

/// Read-only view of the reply pending in one conversation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SendState {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub phase: SendPhase,
    pub payload: OutgoingMessage,
}

#[derive(Debug)]
struct PendingSend {
    /// Same value as the stand-in message's id.
    send_id: MessageId,
    payload: OutgoingMessage,
    ephemeral: Message,
    phase: SendPhase,
}

struct SenderInner {
    transport: Arc<dyn Transport>,
    cache: Arc<ConversationCache>,
    events: EventBus,
    config: SendConfig,
    slots: Mutex<HashMap<ConversationId, PendingSend>>,
}

/// Delayed dispatch with an undo window, at most one reply per conversation.
pub struct DelayedSender {
    inner: Arc<SenderInner>,
    scheduler: Arc<Scheduler>,
}

impl DelayedSender {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<ConversationCache>,
        events: EventBus,
        scheduler: Arc<Scheduler>,
        config: SendConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SenderInner {
                transport,
                cache,
                events,
                config,
                slots: Mutex::new(HashMap::new()),
            }),
            scheduler,
        }
    }

    /// Starts the countdown for `payload`. Rejected while another reply for
    /// the conversation is queued or committing; a failed draft is replaced.
    pub async fn queue(
        &self,
        conversation_id: &ConversationId,
        payload: OutgoingMessage,
    ) -> Result<MessageId, EngineError> {
        let mut slots = self.inner.slots.lock().await;
        let replaces_draft = match slots.get(conversation_id).map(|slot| &slot.phase) {
            Some(SendPhase::Queued { .. } | SendPhase::Committing) => {
                return Err(EngineError::SendAlreadyQueued(conversation_id.clone()));
            }
            Some(SendPhase::Failed { .. }) => true,
            None => false,
        };

        let send_id = MessageId::new(format!("pending-{}", Uuid::new_v4()));
        let ephemeral = ephemeral_message(send_id.clone(), conversation_id, &payload, Utc::now());
        let remaining = self.inner.config.undo_ticks;
        slots.insert(
            conversation_id.clone(),
            PendingSend {
                send_id: send_id.clone(),
                payload,
                ephemeral,
                phase: SendPhase::Queued { remaining },
            },
        );
        if !replaces_draft {
            self.inner.cache.hold(conversation_id).await;
        }
        self.start_countdown(conversation_id, &send_id);
        drop(slots);

        tracing::info!(conversation_id = %conversation_id, message_id = %send_id, remaining, "reply queued");
        self.inner.events.publish(EngineEvent::SendQueued {
            conversation_id: conversation_id.clone(),
            message_id: send_id.clone(),
            remaining,
        });
        Ok(send_id)
    }

    fn start_countdown(&self, conversation_id: &ConversationId, send_id: &MessageId) {
        self.scheduler.schedule(
            TaskKey::Countdown(conversation_id.clone()),
            run_countdown(self.inner.clone(), conversation_id.clone(), send_id.clone()),
        );
    }

    /// Undo. Only a reply still counting down can be cancelled; nothing is
    /// sent once this returns `Ok`.
    pub async fn cancel(&self, conversation_id: &ConversationId) -> Result<(), EngineError> {
        let mut slots = self.inner.slots.lock().await;
        match slots.get(conversation_id).map(|slot| &slot.phase) {
            Some(SendPhase::Queued { .. }) => {
                self.scheduler
                    .cancel(&TaskKey::Countdown(conversation_id.clone()));
                slots.remove(conversation_id);
            }
            _ => return Err(EngineError::NothingQueued(conversation_id.clone())),
        }
        drop(slots);

        self.inner.cache.release(conversation_id).await;
        tracing::info!(conversation_id = %conversation_id, "queued reply cancelled");
        self.inner.events.publish(EngineEvent::SendCancelled {
            conversation_id: conversation_id.clone(),
        });
        Ok(())
    }

    /// Re-queues a failed draft with a fresh countdown.
    pub async fn retry(&self, conversation_id: &ConversationId) -> Result<MessageId, EngineError> {
        let mut slots = self.inner.slots.lock().await;
        let remaining = self.inner.config.undo_ticks;
        let send_id = match slots.get_mut(conversation_id) {
            Some(slot) if matches!(slot.phase, SendPhase::Failed { .. }) => {
                slot.phase = SendPhase::Queued { remaining };
                slot.send_id.clone()
            }
            _ => return Err(EngineError::NoDraft(conversation_id.clone())),
        };
        self.start_countdown(conversation_id, &send_id);
        drop(slots);

        tracing::info!(conversation_id = %conversation_id, message_id = %send_id, "failed reply re-queued");
        self.inner.events.publish(EngineEvent::SendQueued {
            conversation_id: conversation_id.clone(),
            message_id: send_id.clone(),
            remaining,
        });
        Ok(send_id)
    }

    /// Drops a failed draft and its stand-in message.
    pub async fn discard(&self, conversation_id: &ConversationId) -> Result<(), EngineError> {
        let mut slots = self.inner.slots.lock().await;
        match slots.get(conversation_id).map(|slot| &slot.phase) {
            Some(SendPhase::Failed { .. }) => {
                slots.remove(conversation_id);
            }
            _ => return Err(EngineError::NoDraft(conversation_id.clone())),
        }
        drop(slots);

        self.inner.cache.release(conversation_id).await;
        self.inner.events.publish(EngineEvent::DraftDiscarded {
            conversation_id: conversation_id.clone(),
        });
        Ok(())
    }

    pub async fn state(&self, conversation_id: &ConversationId) -> Option<SendState> {
        let slots = self.inner.slots.lock().await;
        slots.get(conversation_id).map(|slot| SendState {
            conversation_id: conversation_id.clone(),
            message_id: slot.send_id.clone(),
            phase: slot.phase.clone(),
            payload: slot.payload.clone(),
        })
    }

    /// The stand-in to show at the end of the thread, if any.
    pub async fn ephemeral(&self, conversation_id: &ConversationId) -> Option<Message> {
        let slots = self.inner.slots.lock().await;
        slots
            .get(conversation_id)
            .map(|slot| slot.ephemeral.clone())
    }

    /// Cancels every reply still counting down. Failed drafts are kept.
    pub async fn cancel_all(&self) -> usize {
        let queued = {
            let slots = self.inner.slots.lock().await;
            slots
                .iter()
                .filter(|(_, slot)| matches!(slot.phase, SendPhase::Queued { .. }))
                .map(|(id, _)| id.clone())
                .collect::<Vec<_>>()
        };
        let mut cancelled = 0;
        for id in queued {
            if self.cancel(&id).await.is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }
}

async fn run_countdown(
    inner: Arc<SenderInner>,
    conversation_id: ConversationId,
    send_id: MessageId,
) {
    let tick = inner.config.tick();
    let mut interval = interval_at(Instant::now() + tick, tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let payload = loop {
        interval.tick().await;

        let mut slots = inner.slots.lock().await;
        let Some(slot) = slots.get_mut(&conversation_id) else {
            return;
        };
        if slot.send_id != send_id {
            return;
        }
        let SendPhase::Queued { remaining } = &mut slot.phase else {
            return;
        };

        *remaining = remaining.saturating_sub(1);
        if *remaining > 0 {
            let remaining = *remaining;
            drop(slots);
            tracing::debug!(conversation_id = %conversation_id, remaining, "send countdown tick");
            inner.events.publish(EngineEvent::SendTick {
                conversation_id: conversation_id.clone(),
                remaining,
            });
            continue;
        }

        // Past this point an undo is refused.
        slot.phase = SendPhase::Committing;
        break slot.payload.clone();
    };

    commit(&inner, &conversation_id, &send_id, payload).await;
}

async fn commit(
    inner: &SenderInner,
    conversation_id: &ConversationId,
    send_id: &MessageId,
    payload: OutgoingMessage,
) {
    let result = inner.transport.send(&payload).await;
    let mut slots = inner.slots.lock().await;
    let Some(slot) = slots
        .get_mut(conversation_id)
        .filter(|slot| &slot.send_id == send_id)
    else {
        return;
    };

    match result {
        Ok(()) => {
            slots.remove(conversation_id);
            drop(slots);
            inner.cache.release(conversation_id).await;
            tracing::info!(conversation_id = %conversation_id, message_id = %send_id, "reply sent");
            inner.events.publish(EngineEvent::SendCommitted {
                conversation_id: conversation_id.clone(),
            });
        }
        Err(err) => {
            slot.phase = SendPhase::Failed {
                error: err.to_string(),
            };
            drop(slots);
            let failure = EngineError::SendFailure {
                conversation_id: conversation_id.clone(),
                source: err,
            };
            tracing::error!(conversation_id = %conversation_id, error = %failure, "reply not sent, draft kept");
            inner.events.publish(EngineEvent::SendFailed {
                conversation_id: conversation_id.clone(),
                error: failure.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RecordingTransport;
    use flowbox_core::Channel;
    use std::time::Duration;

    struct Harness {
        sender: DelayedSender,
        transport: Arc<RecordingTransport>,
        cache: Arc<ConversationCache>,
        events: EventBus,
    }

    fn harness() -> Harness {
        let transport = Arc::new(RecordingTransport::new());
        let cache = Arc::new(ConversationCache::new());
        let events = EventBus::new();
        let sender = DelayedSender::new(
            transport.clone(),
            cache.clone(),
            events.clone(),
            Scheduler::new(),
            SendConfig {
                undo_ticks: 15,
                tick_millis: 1_000,
            },
        );
        Harness {
            sender,
            transport,
            cache,
            events,
        }
    }

    fn payload() -> OutgoingMessage {
        OutgoingMessage {
            channel: Channel::Email,
            to: vec!["buyer@customer.com".to_string()],
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: Some("Re: Order 1182".to_string()),
            body: "Shipped today.".to_string(),
            attachments: Vec::new(),
            threading_hint: None,
        }
    }

    fn id() -> ConversationId {
        ConversationId::from("c1")
    }

    #[tokio::test(start_paused = true)]
    async fn undo_before_zero_sends_nothing() {
        let h = harness();
        h.sender.queue(&id(), payload()).await.expect("queued");
        assert!(h.sender.ephemeral(&id()).await.is_some());
        assert!(h.cache.is_held(&id()).await);

        tokio::time::sleep(Duration::from_millis(14_500)).await;
        assert_eq!(
            h.sender.state(&id()).await.map(|state| state.phase),
            Some(SendPhase::Queued { remaining: 1 })
        );
        h.sender.cancel(&id()).await.expect("cancelled");

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(h.transport.sent().await.is_empty());
        assert!(h.sender.ephemeral(&id()).await.is_none());
        assert!(!h.cache.is_held(&id()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_sends_exactly_once_with_original_payload() {
        let h = harness();
        let mut rx = h.events.subscribe();
        let message_id = h.sender.queue(&id(), payload()).await.expect("queued");
        let ephemeral = h.sender.ephemeral(&id()).await.expect("stand-in");
        assert_eq!(ephemeral.id, message_id);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.transport.sent().await, vec![payload()]);
        assert!(h.sender.state(&id()).await.is_none());
        assert!(h.sender.ephemeral(&id()).await.is_none());

        let mut ticks = 0;
        let mut committed = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                EngineEvent::SendTick { .. } => ticks += 1,
                EngineEvent::SendCommitted { .. } => committed += 1,
                _ => {}
            }
        }
        assert_eq!(ticks, 14);
        assert_eq!(committed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_queue_is_rejected() {
        let h = harness();
        h.sender.queue(&id(), payload()).await.expect("queued");
        let err = h
            .sender
            .queue(&id(), payload())
            .await
            .expect_err("second rejected");
        assert!(matches!(err, EngineError::SendAlreadyQueued(_)));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.transport.sent().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn undo_is_refused_once_committing() {
        let h = harness();
        h.transport.set_delay(Duration::from_secs(5)).await;
        h.sender.queue(&id(), payload()).await.expect("queued");

        tokio::time::sleep(Duration::from_millis(16_000)).await;
        assert_eq!(
            h.sender.state(&id()).await.map(|state| state.phase),
            Some(SendPhase::Committing)
        );
        let err = h.sender.cancel(&id()).await.expect_err("too late");
        assert!(matches!(err, EngineError::NothingQueued(_)));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.transport.sent().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_keeps_draft_until_retried() {
        let h = harness();
        h.transport.fail_next("smtp timeout").await;
        let message_id = h.sender.queue(&id(), payload()).await.expect("queued");

        tokio::time::sleep(Duration::from_secs(20)).await;
        let state = h.sender.state(&id()).await.expect("draft kept");
        assert!(matches!(state.phase, SendPhase::Failed { .. }));
        assert_eq!(state.payload, payload());
        assert_eq!(
            h.sender.ephemeral(&id()).await.map(|message| message.id),
            Some(message_id.clone())
        );
        assert!(h.cache.is_held(&id()).await);

        let retried = h.sender.retry(&id()).await.expect("retried");
        assert_eq!(retried, message_id);
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert!(h.sender.state(&id()).await.is_none());
        assert!(!h.cache.is_held(&id()).await);
        assert_eq!(h.transport.attempts().await, 2);
        assert_eq!(h.transport.sent().await, vec![payload()]);
    }

    #[tokio::test(start_paused = true)]
    async fn discarding_a_failed_draft_releases_the_conversation() {
        let h = harness();
        h.transport.fail_next("rejected").await;
        h.sender.queue(&id(), payload()).await.expect("queued");
        tokio::time::sleep(Duration::from_secs(20)).await;

        h.sender.discard(&id()).await.expect("discarded");
        assert!(h.sender.ephemeral(&id()).await.is_none());
        assert!(!h.cache.is_held(&id()).await);
        assert!(matches!(
            h.sender.discard(&id()).await,
            Err(EngineError::NoDraft(_))
        ));
    }
}
