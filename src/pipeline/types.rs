//! Shared types for the escalation pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{AgentConfig, ConversationId, QueueId, TurnOrigin};

// ── Inbound turn ────────────────────────────────────────────────────

/// One freshly recorded turn that triggers an orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundTurn {
    pub conversation_id: ConversationId,
    pub text: String,
    pub origin: TurnOrigin,
}

impl InboundTurn {
    pub fn customer(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        Self {
            conversation_id,
            text: text.into(),
            origin: TurnOrigin::Customer,
        }
    }
}

// ── Decisions ───────────────────────────────────────────────────────

/// Result of scanning an inbound text for a hand-off request.
///
/// `target_queue_id` and `notice_text` are set exactly when
/// `should_transfer` is true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationDecision {
    pub should_transfer: bool,
    pub target_queue_id: Option<QueueId>,
    pub notice_text: Option<String>,
}

impl EscalationDecision {
    pub fn no_transfer() -> Self {
        Self {
            should_transfer: false,
            target_queue_id: None,
            notice_text: None,
        }
    }

    pub fn transfer_to(queue_id: QueueId, notice: impl Into<String>) -> Self {
        Self {
            should_transfer: true,
            target_queue_id: Some(queue_id),
            notice_text: Some(notice.into()),
        }
    }
}

/// How many automated replies a conversation has had, against its limit.
#[derive(Debug, Clone)]
pub struct ReplyCount {
    pub auto_reply_count: u64,
    pub threshold: u64,
    pub should_escalate: bool,
    /// The active configuration serving the conversation's queue.
    /// `None` means no automation applies.
    pub agent: Option<AgentConfig>,
}

impl ReplyCount {
    pub fn neutral() -> Self {
        Self {
            auto_reply_count: 0,
            threshold: 0,
            should_escalate: false,
            agent: None,
        }
    }
}

// ── Outcomes ────────────────────────────────────────────────────────

/// Why a run ended without doing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AutomatedOrigin,
    ConversationNotFound,
    Unassigned,
    NoActiveAgent,
}

/// What caused an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    ReplyLimit,
    Keyword,
}

/// Pipeline step, used to tag failures in logs and outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Lookup,
    KeywordCheck,
    Transfer,
    Context,
    Provider,
    Delivery,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::KeywordCheck => "keyword_check",
            Self::Transfer => "transfer",
            Self::Context => "context",
            Self::Provider => "provider",
            Self::Delivery => "delivery",
        }
    }
}

/// The single terminal action of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Skipped {
        reason: SkipReason,
    },
    Escalated {
        trigger: EscalationTrigger,
        target_queue_id: QueueId,
    },
    Replied {
        turn_id: Uuid,
    },
    Failed {
        stage: Stage,
    },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped { .. } => "skipped",
            Self::Escalated { .. } => "escalated",
            Self::Replied { .. } => "replied",
            Self::Failed { .. } => "failed",
        }
    }
}
