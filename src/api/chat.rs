//! OpenAI-compatible completion endpoints.
//!
//! Thin HTTP layer: handlers parse the canonical request, run the
//! pipeline, and assemble the response JSON — the canonical completion
//! extended with the `x_cognitude` metadata key (plus the smart-routing
//! keys on `/v1/smart/*`). Rate-limit state rides on `x-ratelimit-*`
//! response headers.

use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderValue,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::limiter::WindowState;
use crate::models::ChatRequest;
use crate::pipeline::{self, Endpoint, PipelineOutcome};
use crate::pricing;
use crate::state::{AppState, Tenant};

/// POST /v1/chat/completions — explicit routing.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<Tenant>,
    Json(body): Json<Value>,
) -> Result<Response, GatewayError> {
    let req = parse_request(body)?;
    let outcome = pipeline::handle_chat(&state, &tenant, req, Endpoint::ChatCompletions).await?;
    Ok(completion_response(outcome))
}

/// POST /v1/smart/completions — cost-aware routing.
pub async fn smart_completions(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<Tenant>,
    Json(body): Json<Value>,
) -> Result<Response, GatewayError> {
    let req = parse_request(body)?;
    let outcome = pipeline::handle_chat(&state, &tenant, req, Endpoint::SmartCompletions).await?;
    Ok(completion_response(outcome))
}

/// POST /v1/smart/analyze — classify only, no upstream call.
pub async fn smart_analyze(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<Tenant>,
    Json(body): Json<Value>,
) -> Result<Response, GatewayError> {
    let req = parse_request(body)?;
    let (analysis, windows) = pipeline::handle_analyze(&state, &tenant, req).await?;
    let mut response = Json(json!(analysis)).into_response();
    append_rate_headers(&mut response, &windows);
    Ok(response)
}

/// GET /v1/models — the models of the tenant's enabled providers, as
/// OpenAI model objects.
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<Tenant>,
) -> Result<Json<Value>, GatewayError> {
    let enabled = state
        .registry
        .enabled_kinds(tenant.org_id)
        .await
        .map_err(GatewayError::Internal)?;

    let models: Vec<Value> = pricing::MODEL_TABLE
        .iter()
        .filter(|spec| enabled.iter().any(|(kind, _)| *kind == spec.provider))
        .map(|spec| {
            json!({
                "id": spec.model,
                "object": "model",
                "owned_by": spec.provider.as_str(),
            })
        })
        .collect();

    Ok(Json(json!({ "object": "list", "data": models })))
}

fn parse_request(body: Value) -> Result<ChatRequest, GatewayError> {
    serde_json::from_value(body)
        .map_err(|e| GatewayError::Validation(format!("malformed chat request: {e}")))
}

/// Canonical response + gateway metadata + smart keys + rate headers.
fn completion_response(outcome: PipelineOutcome) -> Response {
    let PipelineOutcome {
        response,
        meta,
        smart,
        rate_windows,
    } = outcome;

    let mut body = serde_json::to_value(&response)
        .unwrap_or_else(|_| json!({ "object": "chat.completion" }));
    body["x_cognitude"] = json!({
        "cached": meta.cached,
        "cost": meta.cost,
        "provider": meta.provider,
        "cache_key": meta.cache_key,
        "latency_ms": meta.latency_ms,
    });
    if let Some(smart) = smart {
        body["selected_model"] = json!(smart.selected_model);
        body["complexity_score"] = json!(smart.complexity_score);
        body["reasoning"] = json!(smart.reasoning);
    }

    let mut http_response = Json(body).into_response();
    append_rate_headers(&mut http_response, &rate_windows);
    http_response
}

fn append_rate_headers(response: &mut Response, windows: &[WindowState]) {
    let headers = response.headers_mut();
    for window in windows {
        for (suffix, value) in [
            ("limit", window.limit),
            ("remaining", window.remaining),
            ("reset", window.reset_secs as i64),
        ] {
            if let Ok(header_value) = HeaderValue::from_str(&value.to_string()) {
                let name = format!("x-ratelimit-{suffix}-{}", window.label);
                if let Ok(header_name) =
                    axum::http::HeaderName::from_bytes(name.as_bytes())
                {
                    headers.insert(header_name, header_value);
                }
            }
        }
    }
}
