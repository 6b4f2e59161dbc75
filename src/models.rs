//! Canonical chat-completion types.
//!
//! Cognitude normalises all traffic to the OpenAI chat-completions schema.
//! Inbound bodies deserialize into [`ChatRequest`]; unrecognized keys are
//! dropped at that boundary, which is what makes fingerprinting stable across
//! clients that send vendor extensions. Upstream responses are parsed into
//! [`ChatResponse`] by the provider adapters.

use serde::{Deserialize, Serialize};

/// Which upstream provider a request is dispatched to.
///
/// A closed set: each variant maps to exactly one adapter in
/// [`crate::backends`]. Mistral and Groq speak the OpenAI wire format;
/// Anthropic is translated at the edge.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Mistral,
    Groq,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Mistral,
        ProviderKind::Groq,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Mistral => "mistral",
            Self::Groq => "groq",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "mistral" => Some(Self::Mistral),
            "groq" => Some(Self::Groq),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chat message. Roles are restricted to the OpenAI set by
/// [`ChatRequest::validate`], not by the type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// The canonical chat-completion request the pipeline operates on.
///
/// Deserialization is the normalization step: any key not listed here is
/// silently dropped, so two requests differing only in vendor extensions are
/// identical once parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
}

const KNOWN_ROLES: [&str; 3] = ["system", "user", "assistant"];

impl ChatRequest {
    /// Minimal shape check, run before any stage that costs money.
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("`model` must not be empty".into());
        }
        if self.messages.is_empty() {
            return Err("`messages` must contain at least one message".into());
        }
        for msg in &self.messages {
            if !KNOWN_ROLES.contains(&msg.role.as_str()) {
                return Err(format!("unknown message role `{}`", msg.role));
            }
        }
        Ok(())
    }

    /// Concatenated user-message content — the text the classifier scores.
    pub fn user_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Total characters across all message content, for input-size estimates.
    pub fn content_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }
}

/// Token usage as reported (or estimated) for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// The canonical chat-completion response returned to clients (before the
/// gateway metadata key is attached at the API layer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: TokenUsage,
    /// True when the provider omitted usage and we fell back to the
    /// 4-chars-per-token estimate. Not serialized to clients.
    #[serde(skip)]
    pub usage_estimated: bool,
}

/// Fixed tokenizer approximation used whenever a provider omits usage:
/// one token per four characters, rounded up.
pub fn approx_tokens(chars: usize) -> u32 {
    chars.div_ceil(4) as u32
}
