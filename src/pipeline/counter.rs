//! Reply counter — how many automated replies a conversation has received.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::DatabaseError;
use crate::model::{ConversationId, TurnOrigin};
use crate::pipeline::types::ReplyCount;
use crate::store::Database;

/// Derives the automated-reply count from conversation history.
///
/// Pure read: nothing is written. Lookup failures degrade to
/// [`ReplyCount::neutral`].
pub struct ReplyCounter {
    db: Arc<dyn Database>,
}

impl ReplyCounter {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub async fn count(&self, conversation_id: ConversationId) -> ReplyCount {
        match self.try_count(conversation_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(conversation_id, error = %e, "Reply count unavailable, treating as neutral");
                ReplyCount::neutral()
            }
        }
    }

    async fn try_count(&self, conversation_id: ConversationId) -> Result<ReplyCount, DatabaseError> {
        let Some(conversation) = self.db.get_conversation(conversation_id).await? else {
            return Ok(ReplyCount::neutral());
        };
        let Some(queue_id) = conversation.queue_id else {
            return Ok(ReplyCount::neutral());
        };
        let agent = match self.db.agent_config_for_queue(queue_id).await? {
            Some(agent) if agent.active => agent,
            _ => return Ok(ReplyCount::neutral()),
        };

        let auto_reply_count = self
            .db
            .count_turns(conversation_id, TurnOrigin::Automated)
            .await?;
        let threshold = agent.reply_threshold();
        let should_escalate = auto_reply_count >= threshold;

        debug!(
            conversation_id,
            auto_reply_count, threshold, should_escalate, "Reply count resolved"
        );

        Ok(ReplyCount {
            auto_reply_count,
            threshold,
            should_escalate,
            agent: Some(agent),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderKind;
    use crate::model::NewAgentConfig;
    use crate::store::LibSqlBackend;

    async fn setup(max: i64) -> (Arc<LibSqlBackend>, i64) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let bot = db.create_queue("Bot").await.unwrap();
        let humans = db.create_queue("Humanos").await.unwrap();
        db.create_agent_config(
            &NewAgentConfig::new("Ana", ProviderKind::OpenAi, "gpt-4o-mini", bot.id, humans.id)
                .with_max_auto_replies(max),
        )
        .await
        .unwrap();
        let conv = db.create_conversation(Some(bot.id)).await.unwrap();
        (db, conv.id)
    }

    #[tokio::test]
    async fn counts_only_automated_turns() {
        let (db, conv) = setup(3).await;
        db.append_turn(conv, "oi", TurnOrigin::Customer).await.unwrap();
        db.append_turn(conv, "olá", TurnOrigin::Automated).await.unwrap();
        db.append_turn(conv, "preço?", TurnOrigin::Customer).await.unwrap();

        let count = ReplyCounter::new(db.clone()).count(conv).await;
        assert_eq!(count.auto_reply_count, 1);
        assert_eq!(count.threshold, 3);
        assert!(!count.should_escalate);
        assert!(count.agent.is_some());
    }

    #[tokio::test]
    async fn escalates_at_threshold() {
        let (db, conv) = setup(2).await;
        for _ in 0..2 {
            db.append_turn(conv, "resposta", TurnOrigin::Automated).await.unwrap();
        }
        let count = ReplyCounter::new(db.clone()).count(conv).await;
        assert!(count.should_escalate);
    }

    #[tokio::test]
    async fn unassigned_conversation_is_neutral() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let conv = db.create_conversation(None).await.unwrap();
        let count = ReplyCounter::new(db.clone()).count(conv.id).await;
        assert!(count.agent.is_none());
        assert!(!count.should_escalate);
    }

    #[tokio::test]
    async fn inactive_agent_is_neutral() {
        let (db, conv) = setup(1).await;
        let agent = db.list_active_agent_configs().await.unwrap().remove(0);
        db.set_agent_active(agent.id, false).await.unwrap();
        db.append_turn(conv, "x", TurnOrigin::Automated).await.unwrap();

        let count = ReplyCounter::new(db.clone()).count(conv).await;
        assert!(count.agent.is_none());
        assert_eq!(count.auto_reply_count, 0);
        assert!(!count.should_escalate);
    }

    #[tokio::test]
    async fn count_does_not_write() {
        let (db, conv) = setup(5).await;
        db.append_turn(conv, "oi", TurnOrigin::Customer).await.unwrap();
        let before = db.get_conversation(conv).await.unwrap().unwrap();

        let counter = ReplyCounter::new(db.clone());
        counter.count(conv).await;
        counter.count(conv).await;

        let after = db.get_conversation(conv).await.unwrap().unwrap();
        assert_eq!(before.updated_at, after.updated_at);
        assert_eq!(before.queue_id, after.queue_id);
        assert_eq!(db.recent_turns(conv, 10).await.unwrap().len(), 1);
    }
}
