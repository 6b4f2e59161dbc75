//! Tenant API-key authentication middleware.
//!
//! Accepts the key from either `X-API-Key` or `Authorization: Bearer …`,
//! hashes it with the process-wide salt, and resolves the organization by
//! hash — the plaintext key is never stored or logged. The resolved
//! [`Tenant`] is injected as a request extension for the handlers.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::GatewayError;
use crate::state::{AppState, Tenant};

pub async fn tenant_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(api_key) = extract_key(&req) else {
        return GatewayError::Auth(
            "missing API key: send `X-API-Key` or `Authorization: Bearer`".into(),
        )
        .into_response();
    };

    let hash = state.hash_api_key(api_key);
    match state.store.tenant_by_key_hash(&hash).await {
        Ok(Some(tenant)) => {
            req.extensions_mut().insert(Tenant {
                org_id: tenant.id,
                name: tenant.name,
            });
            next.run(req).await
        }
        Ok(None) => GatewayError::Auth("invalid API key".into()).into_response(),
        Err(e) => GatewayError::Unavailable(format!("credential store unavailable: {e}"))
            .into_response(),
    }
}

/// `X-API-Key` wins when both headers are present; the `Bearer` prefix is
/// required on the Authorization form.
fn extract_key(req: &Request) -> Option<&str> {
    if let Some(value) = req.headers().get("x-api-key").and_then(|v| v.to_str().ok()) {
        if !value.is_empty() {
            return Some(value);
        }
    }
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|v| !v.is_empty())
}
