//! Credential checks against each provider's model listing endpoint.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::ProviderEndpoints;
use crate::llm::ProviderKind;

/// Outcome of a credential check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl KeyValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// Ask the provider whether `api_key` is accepted.
///
/// Never fails: transport problems are reported as an invalid result with
/// a connection error.
pub async fn validate_api_key(
    client: &reqwest::Client,
    endpoints: &ProviderEndpoints,
    kind: ProviderKind,
    api_key: &SecretString,
) -> KeyValidation {
    match kind {
        ProviderKind::OpenAi => {
            let url = format!("{}/v1/models", endpoints.openai.trim_end_matches('/'));
            let sent = client
                .get(url)
                .bearer_auth(api_key.expose_secret())
                .send()
                .await;
            match sent {
                Ok(resp) if resp.status().is_success() => KeyValidation::ok(),
                Ok(resp) if resp.status().as_u16() == 401 => {
                    KeyValidation::invalid("Invalid API key for OpenAI")
                }
                Ok(_) => KeyValidation::invalid("Could not validate OpenAI API key"),
                Err(_) => KeyValidation::invalid("Connection error while contacting OpenAI"),
            }
        }
        ProviderKind::Gemini => {
            let url = format!("{}/v1beta/models", endpoints.gemini.trim_end_matches('/'));
            let sent = client
                .get(url)
                .header("x-goog-api-key", api_key.expose_secret())
                .send()
                .await;
            match sent {
                Ok(resp) if resp.status().is_success() => KeyValidation::ok(),
                Ok(resp) if matches!(resp.status().as_u16(), 400 | 403) => {
                    KeyValidation::invalid("Invalid API key for Google Gemini")
                }
                Ok(_) => KeyValidation::invalid("Could not validate Gemini API key"),
                Err(_) => {
                    KeyValidation::invalid("Connection error while contacting Google Gemini")
                }
            }
        }
    }
}
