//! Unified `Database` trait — the message store, queue directory and
//! conversation store the pipeline reads from and writes to.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::model::{
    AgentConfig, AgentId, Conversation, ConversationId, NewAgentConfig, Queue, QueueId, Turn,
    TurnOrigin,
};

/// Backend-agnostic persistence for queues, agents, conversations and turns.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Queues ──────────────────────────────────────────────────────

    async fn create_queue(&self, name: &str) -> Result<Queue, DatabaseError>;

    async fn get_queue(&self, id: QueueId) -> Result<Option<Queue>, DatabaseError>;

    /// All queues, ascending id.
    async fn list_queues(&self) -> Result<Vec<Queue>, DatabaseError>;

    /// Queues with no active agent configuration, ascending id.
    async fn queues_without_active_agent(&self) -> Result<Vec<Queue>, DatabaseError>;

    // ── Agent configurations ────────────────────────────────────────

    /// Insert a configuration. A second active configuration for the same
    /// queue is a `DatabaseError::Constraint`.
    async fn create_agent_config(
        &self,
        config: &NewAgentConfig,
    ) -> Result<AgentConfig, DatabaseError>;

    /// The configuration serving a queue: the active one if present,
    /// otherwise the oldest inactive one.
    async fn agent_config_for_queue(
        &self,
        queue_id: QueueId,
    ) -> Result<Option<AgentConfig>, DatabaseError>;

    async fn list_active_agent_configs(&self) -> Result<Vec<AgentConfig>, DatabaseError>;

    async fn set_agent_active(&self, id: AgentId, active: bool) -> Result<(), DatabaseError>;

    // ── Conversations ───────────────────────────────────────────────

    async fn create_conversation(
        &self,
        queue_id: Option<QueueId>,
    ) -> Result<Conversation, DatabaseError>;

    async fn get_conversation(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, DatabaseError>;

    /// Move a conversation to `queue_id` and mark it pending, in one
    /// statement. Returns `None` when nothing was written, i.e. the
    /// conversation or the queue does not exist.
    async fn update_conversation_queue(
        &self,
        id: ConversationId,
        queue_id: QueueId,
    ) -> Result<Option<Conversation>, DatabaseError>;

    /// Append an automated `notice` and move the conversation to `queue_id`
    /// in one transaction. Either both are written or neither is; `None`
    /// means the conversation or the queue does not exist.
    async fn hand_off(
        &self,
        id: ConversationId,
        queue_id: QueueId,
        notice: &str,
    ) -> Result<Option<(Turn, Conversation)>, DatabaseError>;

    // ── Turns ───────────────────────────────────────────────────────

    async fn append_turn(
        &self,
        conversation_id: ConversationId,
        text: &str,
        origin: TurnOrigin,
    ) -> Result<Turn, DatabaseError>;

    /// The last `limit` turns, newest first.
    async fn recent_turns(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<Turn>, DatabaseError>;

    async fn count_turns(
        &self,
        conversation_id: ConversationId,
        origin: TurnOrigin,
    ) -> Result<u64, DatabaseError>;
}
