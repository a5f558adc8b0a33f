//! Error types for AI Handoff.

use std::time::Duration;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Delivery channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to deliver on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The provider answered with a non-success status.
    #[error("Provider {provider} returned {status}: {message}")]
    Provider {
        provider: String,
        status: u16,
        message: String,
    },

    /// No usable response at all: transport failure, timeout, or garbage body.
    #[error("Provider {provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),
}

impl LlmError {
    /// Build the error used when a call exceeds its time budget.
    pub fn timed_out(provider: impl Into<String>, after: Duration) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            reason: format!("timed out after {after:?}"),
        }
    }

    /// HTTP status for provider-side failures, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Provider { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Queue reassignment errors.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Conversation {0} not found")]
    ConversationNotFound(i64),

    #[error("Queue {0} not found")]
    QueueNotFound(i64),

    #[error("Hand-off notice is empty")]
    EmptyNotice,

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Pipeline-related errors.
///
/// Never leaves `Orchestrator::handle`; it exists so each stage can use `?`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] ChannelError),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
