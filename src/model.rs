//! Domain records shared by the store, the providers and the pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::ProviderKind;

pub type QueueId = i64;
pub type ConversationId = i64;
pub type AgentId = i64;

/// Automated replies allowed before a forced hand-off, when unset.
pub const DEFAULT_MAX_AUTO_REPLIES: i64 = 5;

// ── Turns ───────────────────────────────────────────────────────────

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOrigin {
    Customer,
    /// Anything sent from our side of the conversation.
    Automated,
}

impl TurnOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Automated => "automated",
        }
    }

    /// Label used when rendering a turn into provider context.
    pub fn context_label(&self) -> &'static str {
        match self {
            Self::Customer => "Cliente",
            Self::Automated => "Agente",
        }
    }
}

impl FromStr for TurnOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "automated" => Ok(Self::Automated),
            other => Err(format!("unknown turn origin: {other}")),
        }
    }
}

/// One append-only message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub conversation_id: ConversationId,
    pub text: String,
    pub origin: TurnOrigin,
    pub created_at: DateTime<Utc>,
}

// ── Conversations & queues ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Pending,
    Active,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown conversation status: {other}")),
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A support thread, bound to at most one queue at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub queue_id: Option<QueueId>,
    pub status: ConversationStatus,
    pub updated_at: DateTime<Utc>,
}

/// A routing bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    pub id: QueueId,
    pub name: String,
}

// ── Agent configuration ─────────────────────────────────────────────

/// Binding of a queue to a provider, model and escalation policy.
///
/// `temperature` and `max_output_tokens` are kept exactly as stored;
/// providers sanitize them on construction.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub id: AgentId,
    pub name: String,
    pub provider: ProviderKind,
    pub credential: SecretString,
    pub model: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<i64>,
    pub max_auto_replies: i64,
    pub active: bool,
    pub owner_queue_id: QueueId,
    pub escalation_queue_id: QueueId,
}

impl AgentConfig {
    /// Automated replies allowed before escalation. Non-positive values
    /// fall back to the default.
    pub fn reply_threshold(&self) -> u64 {
        if self.max_auto_replies > 0 {
            self.max_auto_replies as u64
        } else {
            DEFAULT_MAX_AUTO_REPLIES as u64
        }
    }
}

/// Fields for inserting a new agent configuration.
#[derive(Debug, Clone)]
pub struct NewAgentConfig {
    pub name: String,
    pub provider: ProviderKind,
    pub credential: SecretString,
    pub model: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<i64>,
    pub max_auto_replies: Option<i64>,
    pub active: bool,
    pub owner_queue_id: QueueId,
    pub escalation_queue_id: QueueId,
}

impl NewAgentConfig {
    /// Minimal active configuration; the rest takes defaults.
    pub fn new(
        name: impl Into<String>,
        provider: ProviderKind,
        model: impl Into<String>,
        owner_queue_id: QueueId,
        escalation_queue_id: QueueId,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            credential: SecretString::from("unset"),
            model: model.into(),
            system_prompt: None,
            temperature: None,
            max_output_tokens: None,
            max_auto_replies: None,
            active: true,
            owner_queue_id,
            escalation_queue_id,
        }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = SecretString::from(credential.into());
        self
    }

    pub fn with_max_auto_replies(mut self, max: i64) -> Self {
        self.max_auto_replies = Some(max);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}
