//! OpenAI-wire chat completions adapter.
//!
//! Serves every backend that speaks `POST {base}/v1/chat/completions` with
//! Bearer auth — OpenAI itself, Mistral, and Groq (whose base URL carries
//! an `/openai` prefix). The canonical request is already in this shape, so
//! translation is limited to the model override and tolerant response
//! parsing: providers occasionally omit `usage`, in which case tokens are
//! estimated at four characters each and the response is flagged.

use std::time::Duration;

use reqwest::{header, Client};
use serde::Deserialize;

use crate::models::{approx_tokens, ChatChoice, ChatMessage, ChatRequest, ChatResponse, TokenUsage};

use super::UpstreamError;

pub struct OpenAiCompatAdapter {
    client: Client,
    base_url: String,
}

/// Response shape as actually returned by the wire — everything the
/// canonical type requires is optional here and normalized after parsing.
#[derive(Debug, Deserialize)]
struct WireResponse {
    id: Option<String>,
    created: Option<i64>,
    model: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    index: u32,
    message: ChatMessage,
    finish_reason: Option<String>,
}

impl OpenAiCompatAdapter {
    pub fn new(
        base_url: String,
        timeout: Duration,
        api_key: String,
    ) -> Result<Self, UpstreamError> {
        let mut headers = header::HeaderMap::new();
        let value = header::HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| UpstreamError::permanent("API key contains invalid header bytes"))?;
        headers.insert(header::AUTHORIZATION, value);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::permanent(format!("building HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    pub async fn chat(
        &self,
        req: &ChatRequest,
        model: &str,
    ) -> Result<ChatResponse, UpstreamError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut body = serde_json::to_value(req)
            .map_err(|e| UpstreamError::permanent(format!("serializing request: {e}")))?;
        body["model"] = serde_json::Value::String(model.to_string());

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, &url))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, &url))?;

        if !status.is_success() {
            return Err(UpstreamError::from_status(status.as_u16(), &text));
        }

        let wire: WireResponse = serde_json::from_str(&text).map_err(|e| {
            UpstreamError::transient(format!("unparseable completion body: {e}"))
        })?;

        Ok(normalize(wire, req, model))
    }
}

/// Fill in whatever the provider left out and estimate usage when absent.
fn normalize(wire: WireResponse, req: &ChatRequest, model: &str) -> ChatResponse {
    let (usage, usage_estimated) = match wire.usage {
        Some(usage) => (usage, false),
        None => {
            let completion_chars: usize =
                wire.choices.iter().map(|c| c.message.content.len()).sum();
            (
                TokenUsage::new(
                    approx_tokens(req.content_chars()),
                    approx_tokens(completion_chars),
                ),
                true,
            )
        }
    };

    ChatResponse {
        id: wire
            .id
            .unwrap_or_else(|| format!("gen-{}", uuid::Uuid::new_v4())),
        object: "chat.completion".into(),
        created: wire.created.unwrap_or_else(|| chrono::Utc::now().timestamp()),
        model: wire.model.unwrap_or_else(|| model.to_string()),
        choices: wire
            .choices
            .into_iter()
            .map(|c| ChatChoice {
                index: c.index,
                message: c.message,
                finish_reason: c.finish_reason,
            })
            .collect(),
        usage,
        usage_estimated,
    }
}
