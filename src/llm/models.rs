//! Model classification — decides which OpenAI request shape a model needs.
//!
//! Purely a function of the model identifier: exact names are checked
//! first, then prefixes.

/// Effort hint attached to reasoning models in place of temperature.
pub const REASONING_EFFORT: &str = "medium";

/// Reasoning models known by exact name.
static REASONING_EXACT: &[&str] = &[
    "o1",
    "o1-mini",
    "o1-pro",
    "o3",
    "o3-mini",
    "o3-pro",
    "o4-mini",
    "gpt-5",
    "gpt-5-mini",
    "gpt-5-nano",
    "codex-mini-latest",
];

/// Newer, non-reasoning models that only get the full feature set on the
/// responses endpoint.
static RESPONSES_EXACT: &[&str] = &[
    "gpt-4.1",
    "gpt-4.1-mini",
    "gpt-4.1-nano",
    "gpt-5-chat-latest",
];

static REASONING_PREFIXES: &[&str] = &["o1-", "o3-", "o4-", "gpt-5-", "gpt-5."];

static RESPONSES_PREFIXES: &[&str] = &["gpt-4.1-"];

/// Wire shape for an OpenAI request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestShape {
    /// `/v1/chat/completions`
    ChatCompletions,
    /// `/v1/responses`; reasoning models drop temperature for an effort hint.
    Responses { reasoning: bool },
}

impl RequestShape {
    pub fn is_reasoning(&self) -> bool {
        matches!(self, Self::Responses { reasoning: true })
    }
}

/// Classify a model identifier.
pub fn classify_model(model: &str) -> RequestShape {
    let id = model.trim().to_lowercase();

    if REASONING_EXACT.contains(&id.as_str()) {
        return RequestShape::Responses { reasoning: true };
    }
    if RESPONSES_EXACT.contains(&id.as_str()) {
        return RequestShape::Responses { reasoning: false };
    }
    if REASONING_PREFIXES.iter().any(|p| id.starts_with(p)) {
        return RequestShape::Responses { reasoning: true };
    }
    if RESPONSES_PREFIXES.iter().any(|p| id.starts_with(p)) {
        return RequestShape::Responses { reasoning: false };
    }

    RequestShape::ChatCompletions
}
