//! OpenAI adapter — chat completions for classic models, the responses
//! endpoint for newer and reasoning models.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::models::{REASONING_EFFORT, RequestShape, classify_model};
use crate::llm::provider::{
    DEFAULT_SYSTEM_PROMPT, GenerationParams, LlmProvider, error_from_response,
    non_empty_or_fallback, read_json, transport_error,
};
use crate::model::AgentConfig;

const PROVIDER: &str = "openai";

/// Content block type for responses-endpoint input.
const INPUT_BLOCK_TYPE: &str = "text-block";

/// OpenAI provider bound to one agent configuration.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    system_prompt: String,
    params: GenerationParams,
    shape: RequestShape,
}

impl OpenAiProvider {
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
            shape: classify_model(&agent.model),
        }
    }

    pub fn shape(&self) -> RequestShape {
        self.shape
    }

    /// System prompt, optional transcript, then the customer's message.
    fn conversation(&self, prompt: &str, context: Option<&str>) -> Vec<(&'static str, String)> {
        let mut messages = vec![("system", self.system_prompt.clone())];
        if let Some(ctx) = context.filter(|c| !c.trim().is_empty()) {
            messages.push(("assistant", format!("Contexto da conversa: {ctx}")));
        }
        messages.push(("user", prompt.to_string()));
        messages
    }

    fn chat_body(&self, prompt: &str, context: Option<&str>) -> Value {
        let messages: Vec<Value> = self
            .conversation(prompt, context)
            .into_iter()
            .map(|(role, content)| json!({ "role": role, "content": content }))
            .collect();

        json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.params.temperature,
            "max_tokens": self.params.max_output_tokens,
        })
    }

    fn responses_body(&self, prompt: &str, context: Option<&str>) -> Value {
        let input: Vec<Value> = self
            .conversation(prompt, context)
            .into_iter()
            .map(|(role, text)| {
                json!({
                    "role": role,
                    "content": [{ "type": INPUT_BLOCK_TYPE, "text": text }],
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "input": input,
            "max_output_tokens": self.params.max_output_tokens,
        });

        if self.shape.is_reasoning() {
            body["reasoning"] = json!({ "effort": REASONING_EFFORT });
        } else {
            body["temperature"] = json!(self.params.temperature);
        }
        body
    }

    fn endpoint(&self) -> String {
        match self.shape {
            RequestShape::ChatCompletions => format!("{}/v1/chat/completions", self.base_url),
            RequestShape::Responses { .. } => format!("{}/v1/responses", self.base_url),
        }
    }
}

/// `choices[0].message.content`
fn chat_content(json: &Value) -> Option<&str> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
}

/// `output_text`, else `output[0].content[0].text`.
fn responses_content(json: &Value) -> Option<&str> {
    json.get("output_text")
        .and_then(|t| t.as_str())
        .filter(|t| !t.trim().is_empty())
        .or_else(|| {
            json.pointer("/output/0/content/0/text")
                .and_then(|t| t.as_str())
        })
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
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
        let body = match self.shape {
            RequestShape::ChatCompletions => self.chat_body(prompt, context),
            RequestShape::Responses { .. } => self.responses_body(prompt, context),
        };

        debug!(model = %self.model, shape = ?self.shape, "Sending OpenAI request");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PROVIDER, response).await);
        }

        let json = read_json(PROVIDER, response).await?;
        let content = match self.shape {
            RequestShape::ChatCompletions => chat_content(&json),
            RequestShape::Responses { .. } => responses_content(&json),
        };
        Ok(non_empty_or_fallback(PROVIDER, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderKind;

    fn agent(model: &str) -> AgentConfig {
        AgentConfig {
            id: 1,
            name: "Suporte".into(),
            provider: ProviderKind::OpenAi,
            credential: SecretString::from("sk-test"),
            model: model.into(),
            system_prompt: Some("Você é um atendente.".into()),
            temperature: Some(5.0),
            max_output_tokens: Some(9000),
            max_auto_replies: 5,
            active: true,
            owner_queue_id: 1,
            escalation_queue_id: 2,
        }
    }

    fn provider(model: &str) -> OpenAiProvider {
        OpenAiProvider::new(reqwest::Client::new(), "https://api.openai.com/", &agent(model))
    }

    #[test]
    fn chat_body_matches_classic_wire_shape() {
        let body = provider("gpt-4o-mini").chat_body("Oi", Some("Cliente: Oi"));
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["temperature"], 2.0);
        assert_eq!(body["max_tokens"], 4096);

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "Você é um atendente.");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"], "Contexto da conversa: Cliente: Oi");
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"], "Oi");
    }

    #[test]
    fn chat_body_without_context_skips_assistant_message() {
        let body = provider("gpt-4o").chat_body("Oi", None);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn responses_body_for_reasoning_model_omits_temperature() {
        let p = provider("o3-mini");
        assert_eq!(p.shape(), RequestShape::Responses { reasoning: true });

        let body = p.responses_body("Oi", None);
        assert!(body.get("temperature").is_none());
        assert_eq!(body["reasoning"]["effort"], REASONING_EFFORT);
        assert_eq!(body["max_output_tokens"], 4096);
        assert!(body.get("max_tokens").is_none());

        let input = body["input"].as_array().unwrap();
        assert_eq!(input[1]["role"], "user");
        assert_eq!(input[1]["content"][0]["type"], "text-block");
        assert_eq!(input[1]["content"][0]["text"], "Oi");
    }

    #[test]
    fn responses_body_for_newer_model_keeps_temperature() {
        let body = provider("gpt-4.1").responses_body("Oi", None);
        assert_eq!(body["temperature"], 2.0);
        assert!(body.get("reasoning").is_none());
    }

    #[test]
    fn endpoint_follows_shape() {
        assert_eq!(
            provider("gpt-4o").endpoint(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            provider("gpt-5").endpoint(),
            "https://api.openai.com/v1/responses"
        );
    }

    #[test]
    fn blank_system_prompt_uses_default() {
        let mut config = agent("gpt-4o");
        config.system_prompt = Some("  ".into());
        let p = OpenAiProvider::new(reqwest::Client::new(), "http://x", &config);
        let body = p.chat_body("Oi", None);
        assert_eq!(body["messages"][0]["content"], DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn responses_content_prefers_output_text() {
        let json = json!({
            "output_text": "Atendemos das 9h às 18h",
            "output": [{ "content": [{ "text": "ignored" }] }]
        });
        assert_eq!(responses_content(&json), Some("Atendemos das 9h às 18h"));
    }

    #[test]
    fn responses_content_falls_back_to_nested_output() {
        let json = json!({ "output": [{ "content": [{ "type": "output_text", "text": "Olá" }] }] });
        assert_eq!(responses_content(&json), Some("Olá"));
        assert_eq!(responses_content(&json!({ "output": [] })), None);
    }

    #[test]
    fn chat_content_reads_first_choice() {
        let json = json!({ "choices": [{ "message": { "content": "Olá" } }] });
        assert_eq!(chat_content(&json), Some("Olá"));
        assert_eq!(chat_content(&json!({ "choices": [] })), None);
    }
}
