use flowbox_core::{ConversationId, MessageId};
use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    SyncCompleted {
        conversations: usize,
        kept_local: usize,
    },
    SyncFailed {
        error: String,
        retry_in_secs: u64,
    },
    /// An optimistic edit was refused and the previous value restored.
    EditRolledBack {
        conversation_id: ConversationId,
        error: String,
    },
    SendQueued {
        conversation_id: ConversationId,
        message_id: MessageId,
        remaining: u32,
    },
    SendTick {
        conversation_id: ConversationId,
        remaining: u32,
    },
    SendCommitted {
        conversation_id: ConversationId,
    },
    SendCancelled {
        conversation_id: ConversationId,
    },
    SendFailed {
        conversation_id: ConversationId,
        error: String,
    },
    DraftDiscarded {
        conversation_id: ConversationId,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
