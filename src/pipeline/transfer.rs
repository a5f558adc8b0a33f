//! Queue reassignment — moves a conversation to another queue.

use std::sync::Arc;

use tracing::info;

use crate::error::TransferError;
use crate::model::{Conversation, ConversationId, QueueId, Turn};
use crate::pipeline::events::{EventBus, PipelineEvent};
use crate::store::Database;

pub struct QueueReassigner {
    db: Arc<dyn Database>,
    events: EventBus,
}

impl QueueReassigner {
    pub fn new(db: Arc<dyn Database>, events: EventBus) -> Self {
        Self { db, events }
    }

    /// Check that both the conversation and the target queue exist.
    pub async fn validate(
        &self,
        conversation_id: ConversationId,
        target_queue_id: QueueId,
    ) -> Result<(), TransferError> {
        if self.db.get_conversation(conversation_id).await?.is_none() {
            return Err(TransferError::ConversationNotFound(conversation_id));
        }
        if self.db.get_queue(target_queue_id).await?.is_none() {
            return Err(TransferError::QueueNotFound(target_queue_id));
        }
        Ok(())
    }

    /// Set the conversation's queue and reopen it as pending, then notify
    /// listeners.
    pub async fn reassign(
        &self,
        conversation_id: ConversationId,
        target_queue_id: QueueId,
    ) -> Result<Conversation, TransferError> {
        let Some(conversation) = self
            .db
            .update_conversation_queue(conversation_id, target_queue_id)
            .await?
        else {
            // Nothing written; report which side is missing.
            self.validate(conversation_id, target_queue_id).await?;
            return Err(TransferError::QueueNotFound(target_queue_id));
        };

        info!(
            conversation_id,
            queue_id = target_queue_id,
            "Conversation transferred"
        );
        self.events.publish(PipelineEvent::ConversationTransferred {
            conversation: conversation.clone(),
        });
        Ok(conversation)
    }

    /// Record `notice` as an automated turn and move the conversation, as
    /// one write. Listeners hear about both only once it is committed.
    pub async fn hand_off(
        &self,
        conversation_id: ConversationId,
        target_queue_id: QueueId,
        notice: &str,
    ) -> Result<(Turn, Conversation), TransferError> {
        if notice.trim().is_empty() {
            return Err(TransferError::EmptyNotice);
        }
        let Some((turn, conversation)) = self
            .db
            .hand_off(conversation_id, target_queue_id, notice)
            .await?
        else {
            self.validate(conversation_id, target_queue_id).await?;
            return Err(TransferError::QueueNotFound(target_queue_id));
        };

        info!(
            conversation_id,
            queue_id = target_queue_id,
            "Conversation handed off"
        );
        self.events
            .publish(PipelineEvent::TurnAppended { turn: turn.clone() });
        self.events.publish(PipelineEvent::ConversationTransferred {
            conversation: conversation.clone(),
        });
        Ok((turn, conversation))
    }
}
