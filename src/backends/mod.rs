//! Provider adapter factory and the upstream failure taxonomy.
//!
//! [`ProviderClient`] is an enum that wraps a concrete adapter chosen at
//! construction time from the [`ProviderKind`]. The pipeline interacts with
//! one method (`chat`); schema translation, auth headers, and endpoint
//! paths are fully encapsulated in the adapter modules. OpenAI, Mistral,
//! and Groq all speak the OpenAI wire protocol and share one adapter;
//! Anthropic gets its own with request/response translation.

mod anthropic;
mod openai_compat;

pub use anthropic::AnthropicAdapter;
pub use openai_compat::OpenAiCompatAdapter;

use std::time::Duration;

use crate::models::{ChatRequest, ChatResponse, ProviderKind};

/// How an upstream failure constrains the caller's recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 408/429/5xx, connection failures, unparseable bodies: safe to retry
    /// on the next provider.
    Transient,
    /// The provider does not know the model (404 / unknown-model). The
    /// dispatcher may retry with a different model per the route plan.
    ModelTransient,
    /// Remaining 4xx and schema failures: do not retry elsewhere.
    Permanent,
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub class: FailureClass,
    pub status: Option<u16>,
    pub message: String,
}

impl UpstreamError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            status: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Permanent,
            status: None,
            message: message.into(),
        }
    }

    /// Classify a non-2xx response by status and body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("upstream returned HTTP {status}: {}", truncate(body, 300));
        Self {
            class: classify_status(status, body),
            status: Some(status),
            message,
        }
    }

    /// Whether the dispatcher may move on to the next planned attempt.
    pub fn retryable(&self) -> bool {
        matches!(
            self.class,
            FailureClass::Transient | FailureClass::ModelTransient
        )
    }

    /// Connection, timeout, and body-read failures are all transient: the
    /// provider may be having a bad moment, another one can still answer.
    pub(crate) fn from_reqwest(e: reqwest::Error, url: &str) -> Self {
        Self::transient(format!("request to {url} failed: {e}"))
    }
}

/// Map an HTTP status (plus the body, for unknown-model detection) onto the
/// failure taxonomy.
pub fn classify_status(status: u16, body: &str) -> FailureClass {
    match status {
        404 => FailureClass::ModelTransient,
        400 if mentions_unknown_model(body) => FailureClass::ModelTransient,
        408 | 429 => FailureClass::Transient,
        500..=599 => FailureClass::Transient,
        _ => FailureClass::Permanent,
    }
}

fn mentions_unknown_model(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("model")
        && (lower.contains("not found")
            || lower.contains("does not exist")
            || lower.contains("unknown model")
            || lower.contains("model_not_found"))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Unified provider client — enum dispatch over the concrete adapters.
pub enum ProviderClient {
    OpenAiCompat(OpenAiCompatAdapter),
    Anthropic(AnthropicAdapter),
}

impl ProviderClient {
    /// Build a client for one dispatch attempt.
    ///
    /// `base_url` override exists for self-hosted proxies and tests;
    /// `None` uses the provider's public endpoint.
    pub fn new(
        kind: ProviderKind,
        api_key: String,
        timeout: Duration,
        base_url: Option<&str>,
    ) -> Result<Self, UpstreamError> {
        let base = base_url
            .unwrap_or_else(|| default_base_url(kind))
            .trim_end_matches('/')
            .to_string();
        Ok(match kind {
            ProviderKind::Anthropic => {
                Self::Anthropic(AnthropicAdapter::new(base, timeout, api_key)?)
            }
            ProviderKind::OpenAi | ProviderKind::Mistral | ProviderKind::Groq => {
                Self::OpenAiCompat(OpenAiCompatAdapter::new(base, timeout, api_key)?)
            }
        })
    }

    /// Issue one upstream call, translating to and from the canonical
    /// schema. `model` overrides the model in `req` — the route plan's
    /// choice, not necessarily what the client asked for.
    pub async fn chat(
        &self,
        req: &ChatRequest,
        model: &str,
    ) -> Result<ChatResponse, UpstreamError> {
        match self {
            Self::OpenAiCompat(a) => a.chat(req, model).await,
            Self::Anthropic(a) => a.chat(req, model).await,
        }
    }
}

pub fn default_base_url(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAi => "https://api.openai.com",
        ProviderKind::Anthropic => "https://api.anthropic.com",
        ProviderKind::Mistral => "https://api.mistral.ai",
        ProviderKind::Groq => "https://api.groq.com/openai",
    }
}
