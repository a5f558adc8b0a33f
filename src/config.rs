//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::pipeline::escalation::HandoffKeywords;

const DEFAULT_PORT: u16 = 8080;

/// Notice sent when a conversation hits its automated-reply limit.
pub const DEFAULT_LIMIT_NOTICE: &str = "Percebo que sua solicitação precisa de mais atenção. \
Vou transferir você para um de nossos atendentes especializados que poderá ajudá-lo melhor. \
Aguarde um momento! 😊";

/// Notice sent when the customer explicitly asks for a human.
pub const DEFAULT_HANDOFF_NOTICE: &str = "Entendi que você gostaria de falar com um atendente \
humano. Vou transferir você para nossa equipe de atendimento. Em alguns instantes um de nossos \
atendentes irá te responder. Obrigado pela paciência! 😊";

/// Behaviour of the escalation pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How many recent turns go into the provider's context window.
    pub context_turns: usize,
    /// Upper bound on a single provider call.
    pub provider_timeout: Duration,
    /// Phrases that mean "I want a human".
    pub keywords: HandoffKeywords,
    /// Sent before a threshold escalation.
    pub limit_notice: String,
    /// Sent before a keyword escalation.
    pub handoff_notice: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            context_turns: 10,
            provider_timeout: Duration::from_secs(30),
            keywords: HandoffKeywords::default(),
            limit_notice: DEFAULT_LIMIT_NOTICE.to_string(),
            handoff_notice: DEFAULT_HANDOFF_NOTICE.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let context_turns: usize = std::env::var("AI_HANDOFF_CONTEXT_TURNS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.context_turns);

        let provider_timeout = std::env::var("AI_HANDOFF_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|n| *n > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.provider_timeout);

        let keywords = std::env::var("AI_HANDOFF_KEYWORDS")
            .ok()
            .map(|raw| HandoffKeywords::new(raw.split(',')))
            .filter(|k| !k.is_empty())
            .unwrap_or(defaults.keywords);

        let limit_notice = non_blank(std::env::var("AI_HANDOFF_LIMIT_NOTICE").ok())
            .unwrap_or(defaults.limit_notice);
        let handoff_notice = non_blank(std::env::var("AI_HANDOFF_HANDOFF_NOTICE").ok())
            .unwrap_or(defaults.handoff_notice);

        Self {
            context_turns,
            provider_timeout,
            keywords,
            limit_notice,
            handoff_notice,
        }
    }
}

/// Blank values count as unset.
fn non_blank(raw: Option<String>) -> Option<String> {
    raw.filter(|s| !s.trim().is_empty())
}

/// Base URLs for the provider APIs. Overridable for proxies and tests.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub openai: String,
    pub gemini: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            openai: "https://api.openai.com".to_string(),
            gemini: "https://generativelanguage.googleapis.com".to_string(),
        }
    }
}

impl ProviderEndpoints {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            openai: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.openai),
            gemini: std::env::var("GEMINI_BASE_URL").unwrap_or(defaults.gemini),
        }
    }

    /// Point every backend at the same base URL.
    pub fn single(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            openai: base_url.clone(),
            gemini: base_url,
        }
    }
}

/// Process-level settings for the binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub endpoints: ProviderEndpoints,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// A port that is set but unparseable is an error; everything else
    /// falls back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path = std::env::var("AI_HANDOFF_DB_PATH")
            .unwrap_or_else(|_| "./data/ai-handoff.db".to_string())
            .into();

        let port = match std::env::var("AI_HANDOFF_PORT") {
            Ok(raw) => parse_port(&raw)?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            db_path,
            port,
            endpoints: ProviderEndpoints::from_env(),
            pipeline: PipelineConfig::from_env(),
        })
    }
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    raw.trim()
        .parse::<u16>()
        .map_err(|e| ConfigError::InvalidValue {
            key: "AI_HANDOFF_PORT".to_string(),
            message: e.to_string(),
        })
}
