//! Outbound delivery of automated turns.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::model::{ConversationId, Turn, TurnOrigin};
use crate::pipeline::events::{EventBus, PipelineEvent};
use crate::store::Database;

/// Sends a message into a conversation on behalf of the system.
///
/// The returned turn is the one recorded in the conversation history.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(
        &self,
        conversation_id: ConversationId,
        text: &str,
    ) -> Result<Turn, ChannelError>;
}

/// Delivery that records the turn in the store and announces it on the
/// event bus. Anything pushing to a customer-facing channel subscribes there.
pub struct StoreDelivery {
    db: Arc<dyn Database>,
    events: EventBus,
}

impl StoreDelivery {
    pub fn new(db: Arc<dyn Database>, events: EventBus) -> Self {
        Self { db, events }
    }
}

#[async_trait]
impl DeliveryChannel for StoreDelivery {
    fn name(&self) -> &str {
        "store"
    }

    async fn deliver(
        &self,
        conversation_id: ConversationId,
        text: &str,
    ) -> Result<Turn, ChannelError> {
        if text.trim().is_empty() {
            return Err(ChannelError::SendFailed {
                name: self.name().to_string(),
                reason: "refusing to send an empty message".to_string(),
            });
        }
        let turn = self
            .db
            .append_turn(conversation_id, text, TurnOrigin::Automated)
            .await?;
        self.events
            .publish(PipelineEvent::TurnAppended { turn: turn.clone() });
        Ok(turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    #[tokio::test]
    async fn deliver_appends_automated_turn_and_publishes() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let conv = db.create_conversation(None).await.unwrap();
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let delivery = StoreDelivery::new(db.clone(), events);

        let turn = delivery.deliver(conv.id, "Olá! Como posso ajudar?").await.unwrap();
        assert_eq!(turn.origin, TurnOrigin::Automated);
        assert_eq!(db.count_turns(conv.id, TurnOrigin::Automated).await.unwrap(), 1);

        match rx.recv().await.unwrap() {
            PipelineEvent::TurnAppended { turn: published } => assert_eq!(published.id, turn.id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_text_is_not_delivered() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let conv = db.create_conversation(None).await.unwrap();
        let delivery = StoreDelivery::new(db.clone(), EventBus::new());

        let err = delivery.deliver(conv.id, "  ").await.unwrap_err();
        assert!(matches!(err, ChannelError::SendFailed { .. }));
        assert_eq!(db.count_turns(conv.id, TurnOrigin::Automated).await.unwrap(), 0);
    }
}
