//! Provider contract and the pieces every backend shares.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::LlmError;

/// Returned when a provider answers successfully but with no text.
pub const FALLBACK_REPLY: &str = "Desculpe, não consegui gerar uma resposta no momento.";

/// Used when an agent has no system prompt of its own.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful customer service assistant.";

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const MAX_TEMPERATURE: f64 = 2.0;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;
pub const MAX_OUTPUT_TOKENS: u32 = 4096;

/// A language-model backend that can answer one customer message.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Backend name, used in errors and logs.
    fn provider_name(&self) -> &str;

    /// Model identifier sent on the wire.
    fn model_name(&self) -> &str;

    /// Generate a reply to `prompt`, optionally grounded in a rendered
    /// conversation transcript.
    async fn generate_response(
        &self,
        prompt: &str,
        context: Option<&str>,
    ) -> Result<String, LlmError>;
}

/// Numeric generation settings after sanitation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f64,
    pub max_output_tokens: u32,
}

impl GenerationParams {
    /// Clamp stored values into the ranges every backend accepts.
    ///
    /// Missing or non-finite temperature becomes 0.7; missing token budget
    /// becomes 1024.
    pub fn sanitize(temperature: Option<f64>, max_output_tokens: Option<i64>) -> Self {
        let temperature = match temperature {
            Some(t) if t.is_finite() => t.clamp(0.0, MAX_TEMPERATURE),
            _ => DEFAULT_TEMPERATURE,
        };
        let max_output_tokens = match max_output_tokens {
            Some(n) => n.clamp(1, MAX_OUTPUT_TOKENS as i64) as u32,
            None => DEFAULT_MAX_OUTPUT_TOKENS,
        };
        Self {
            temperature,
            max_output_tokens,
        }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::sanitize(None, None)
    }
}

/// Replace a blank completion with the fixed fallback reply.
pub(crate) fn non_empty_or_fallback(provider: &str, content: Option<&str>) -> String {
    match content {
        Some(text) if !text.trim().is_empty() => text.to_string(),
        _ => {
            tracing::warn!(provider, "Provider returned empty response");
            FALLBACK_REPLY.to_string()
        }
    }
}

/// Turn a non-success HTTP response into `LlmError::Provider`.
///
/// Uses the provider's own `error.message` when the body decodes, the HTTP
/// reason phrase otherwise.
pub(crate) async fn error_from_response(provider: &str, response: reqwest::Response) -> LlmError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = provider_error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    });

    tracing::error!(
        provider,
        status = status.as_u16(),
        message = %message,
        "Provider API error"
    );

    LlmError::Provider {
        provider: provider.to_string(),
        status: status.as_u16(),
        message,
    }
}

/// Map a reqwest failure where no response was received.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> LlmError {
    let reason = if err.is_timeout() {
        "request timed out".to_string()
    } else {
        format!("request failed: {err}")
    };
    LlmError::Unavailable {
        provider: provider.to_string(),
        reason,
    }
}

/// Decode a success body, classifying garbage as unavailability.
pub(crate) async fn read_json(provider: &str, response: reqwest::Response) -> Result<Value, LlmError> {
    response.json::<Value>().await.map_err(|e| LlmError::Unavailable {
        provider: provider.to_string(),
        reason: format!("undecodable response body: {e}"),
    })
}

/// Pull `error.message` (or a bare `error` string) out of an error body.
fn provider_error_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    let error = json.get("error")?;
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}
