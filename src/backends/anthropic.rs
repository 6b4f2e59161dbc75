//! Anthropic Messages API adapter.
//!
//! Translates between the canonical chat-completions schema and Anthropic's
//! `/v1/messages` API. The pipeline dispatches canonical requests; this
//! adapter handles the schema differences at the edge.
//!
//! # Protocol differences handled here
//!
//! | Concern | Canonical | Anthropic |
//! |---|---|---|
//! | System prompt | `role: "system"` message | top-level `system` field |
//! | Max tokens | optional | **required** |
//! | Finish reasons | `"stop"`, `"length"` | `"end_turn"`, `"max_tokens"` |
//! | Response shape | `choices[].message.content` | `content[].text` |
//! | Auth header | `Authorization: Bearer …` | `x-api-key: …` |

use std::time::Duration;

use reqwest::{header, Client};
use serde_json::{json, Value};

use crate::models::{approx_tokens, ChatChoice, ChatMessage, ChatRequest, ChatResponse, TokenUsage};

use super::UpstreamError;

/// Default max_tokens when the caller omits it. Required by Anthropic;
/// sensible ceiling for conversational use.
const DEFAULT_MAX_TOKENS: u32 = 8_192;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    client: Client,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(
        base_url: String,
        timeout: Duration,
        api_key: String,
    ) -> Result<Self, UpstreamError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            "x-api-key",
            header::HeaderValue::from_str(&api_key)
                .map_err(|_| UpstreamError::permanent("API key contains invalid header bytes"))?,
        );
        headers.insert(
            "anthropic-version",
            header::HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::permanent(format!("building HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// Translate and forward to `POST /v1/messages`, then translate the
    /// response back to the canonical schema.
    pub async fn chat(
        &self,
        req: &ChatRequest,
        model: &str,
    ) -> Result<ChatResponse, UpstreamError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = to_anthropic(req, model);

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

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| UpstreamError::transient(format!("unparseable messages body: {e}")))?;

        from_anthropic(parsed, req, model)
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Schema translation — pub(crate) for unit testing
// ──────────────────────────────────────────────────────────────────────────────

/// Convert a canonical request to the Anthropic Messages format.
pub(crate) fn to_anthropic(req: &ChatRequest, model: &str) -> Value {
    // Anthropic treats system content as a top-level field, not a message
    // role. Multiple system messages are concatenated.
    let mut system_parts: Vec<&str> = Vec::new();
    let mut messages: Vec<Value> = Vec::with_capacity(req.messages.len());

    for msg in &req.messages {
        if msg.role == "system" {
            system_parts.push(&msg.content);
        } else {
            messages.push(json!({"role": msg.role, "content": msg.content}));
        }
    }

    let mut body = json!({
        "model": model,
        "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": messages,
    });

    if !system_parts.is_empty() {
        body["system"] = Value::String(system_parts.join("\n\n"));
    }
    if let Some(temp) = req.temperature {
        body["temperature"] = json!(temp);
    }
    if let Some(top_p) = req.top_p {
        body["top_p"] = json!(top_p);
    }

    body
}

/// Convert an Anthropic Messages response to the canonical schema.
pub(crate) fn from_anthropic(
    resp: Value,
    req: &ChatRequest,
    model: &str,
) -> Result<ChatResponse, UpstreamError> {
    // Responses carry a `content` array of typed blocks; the first text
    // block is the assistant message. Tool-use blocks are out of scope.
    let text = resp["content"]
        .as_array()
        .and_then(|blocks| blocks.iter().find(|b| b["type"] == "text"))
        .and_then(|b| b["text"].as_str())
        .ok_or_else(|| {
            UpstreamError::transient("no text block in Anthropic response `content` array")
        })?
        .to_string();

    let finish_reason = match resp["stop_reason"].as_str().unwrap_or("stop") {
        "end_turn" => "stop",
        "max_tokens" => "length",
        other => other,
    };

    let input_tokens = resp["usage"]["input_tokens"].as_u64();
    let output_tokens = resp["usage"]["output_tokens"].as_u64();
    let (usage, usage_estimated) = match (input_tokens, output_tokens) {
        (Some(input), Some(output)) => (TokenUsage::new(input as u32, output as u32), false),
        _ => (
            TokenUsage::new(approx_tokens(req.content_chars()), approx_tokens(text.len())),
            true,
        ),
    };

    Ok(ChatResponse {
        id: resp["id"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("gen-{}", uuid::Uuid::new_v4())),
        object: "chat.completion".into(),
        created: chrono::Utc::now().timestamp(),
        model: resp["model"].as_str().unwrap_or(model).to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage::new("assistant", text),
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage,
        usage_estimated,
    })
}

// ──────────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────────
