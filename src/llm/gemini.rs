//! Google Gemini adapter (`generateContent`).

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{
    DEFAULT_SYSTEM_PROMPT, GenerationParams, LlmProvider, error_from_response,
    non_empty_or_fallback, read_json, transport_error,
};
use crate::model::AgentConfig;

const PROVIDER: &str = "gemini";

/// Gemini provider bound to one agent configuration.
///
/// Gemini gets a single user part, so the system prompt and transcript are
/// folded into the prompt text.
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    system_prompt: String,
    params: GenerationParams,
}

impl GeminiProvider {
    pub fn new(client: reqwest::Client, base_url: &str, agent: &AgentConfig) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: agent.credential.clone(),
            model: agent.model.clone(),
            system_prompt: agent
                .system_prompt
                .clone()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            params: GenerationParams::sanitize(agent.temperature, agent.max_output_tokens),
        }
    }

    fn full_prompt(&self, prompt: &str, context: Option<&str>) -> String {
        match context.filter(|c| !c.trim().is_empty()) {
            Some(ctx) => format!("{}\n\nContexto: {ctx}\n\n{prompt}", self.system_prompt),
            None => format!("{}\n\n{prompt}", self.system_prompt),
        }
    }

    fn body(&self, prompt: &str, context: Option<&str>) -> Value {
        json!({
            "contents": [{
                "parts": [{ "text": self.full_prompt(prompt, context) }]
            }],
            "generationConfig": {
                "temperature": self.params.temperature,
                "maxOutputTokens": self.params.max_output_tokens,
            }
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate_response(
        &self,
        prompt: &str,
        context: Option<&str>,
    ) -> Result<String, LlmError> {
        debug!(model = %self.model, "Sending Gemini request");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&self.body(prompt, context))
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PROVIDER, response).await);
        }

        let json = read_json(PROVIDER, response).await?;
        let content = json
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|t| t.as_str());
        Ok(non_empty_or_fallback(PROVIDER, content))
    }
}
