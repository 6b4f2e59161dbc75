//! Operator endpoints on the ops port.
//!
//! `/metrics` renders the process counters in Prometheus text format.
//! When `ops_token_env` is configured, requests must carry the matching
//! bearer token; otherwise the port is expected to be network-restricted.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::state::AppState;

pub async fn metrics(State(state): State<Arc<AppState>>, req: Request) -> impl IntoResponse {
    if let Some(expected) = &state.ops_token {
        let provided = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if provided != Some(expected.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer realm=\"cognitude-ops\"")],
                "ops bearer token required\n".to_string(),
            )
                .into_response();
        }
    }

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.render_prometheus(),
    )
        .into_response()
}
