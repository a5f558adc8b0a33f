//! Pipeline event bus — broadcast of turns and transfers to any listener.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::model::{Conversation, Turn};

const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Something downstream consumers (operator UIs, webhooks) care about.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    TurnAppended { turn: Turn },
    ConversationTransferred { conversation: Conversation },
}

/// Fan-out of pipeline events. Sending never blocks and never fails,
/// even with no subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: PipelineEvent) {
        // No receivers is fine.
        if self.tx.send(event).is_err() {
            debug!("Pipeline event dropped, no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
