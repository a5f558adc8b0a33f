//! LLM integration for AI Handoff.
//!
//! Supports:
//! - **OpenAI**: chat completions for classic models, the responses endpoint
//!   for newer and reasoning models (picked from the model id)
//! - **Gemini**: `generateContent`
//!
//! Both talk HTTP directly through reqwest so the request bodies stay
//! exactly as the providers expect them.

pub mod gemini;
pub mod models;
pub mod openai;
pub mod provider;
pub mod validate;

pub use gemini::GeminiProvider;
pub use models::{RequestShape, classify_model};
pub use openai::OpenAiProvider;
pub use provider::*;
pub use validate::{KeyValidation, validate_api_key};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::ProviderEndpoints;
use crate::error::LlmError;
use crate::model::AgentConfig;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            other => Err(LlmError::InvalidConfig(format!(
                "unsupported provider: {other}"
            ))),
        }
    }
}

/// Builds a provider for an agent configuration.
///
/// The orchestrator only sees this trait, so adding a backend never touches it.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, agent: &AgentConfig) -> Result<Arc<dyn LlmProvider>, LlmError>;
}

/// Factory for the real HTTP backends, sharing one connection pool.
pub struct HttpProviderFactory {
    client: reqwest::Client,
    endpoints: ProviderEndpoints,
}

impl HttpProviderFactory {
    /// `timeout` bounds each HTTP request end to end.
    pub fn new(endpoints: ProviderEndpoints, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::InvalidConfig(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, endpoints })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn create(&self, agent: &AgentConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
        create_provider(self.client.clone(), &self.endpoints, agent)
    }
}

/// Create an LLM provider from an agent configuration.
pub fn create_provider(
    client: reqwest::Client,
    endpoints: &ProviderEndpoints,
    agent: &AgentConfig,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    if agent.model.trim().is_empty() {
        return Err(LlmError::InvalidConfig(format!(
            "agent {} has no model configured",
            agent.id
        )));
    }
    if agent.credential.expose_secret().trim().is_empty() {
        return Err(LlmError::InvalidConfig(format!(
            "agent {} has no credential configured",
            agent.id
        )));
    }

    let provider: Arc<dyn LlmProvider> = match agent.provider {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(client, &endpoints.openai, agent)),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(client, &endpoints.gemini, agent)),
    };
    tracing::debug!(
        agent_id = agent.id,
        provider = %agent.provider,
        model = %agent.model,
        "Provider created"
    );
    Ok(provider)
}
