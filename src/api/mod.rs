//! HTTP surface: router construction and middleware.
//!
//! Two routers, two ports. The client router carries the OpenAI-compatible
//! endpoints plus the tenant management surface behind API-key auth; the
//! ops router carries `/healthz` and `/metrics` for operators and is meant
//! to be network-restricted (or guarded with `ops_token_env`).

pub mod auth;
pub mod chat;
pub mod health;
pub mod management;
pub mod ops;
pub mod request_id;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use crate::state::AppState;

/// Build the tenant-facing router (client port).
pub fn client_router(state: Arc<AppState>) -> Router {
    let authed = Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/smart/completions", post(chat::smart_completions))
        .route("/v1/smart/analyze", post(chat::smart_analyze))
        .route("/v1/models", get(chat::list_models))
        .route(
            "/providers",
            get(management::list_providers).post(management::create_provider),
        )
        .route(
            "/providers/{provider}",
            put(management::update_provider).delete(management::delete_provider),
        )
        .route(
            "/rate-limits/config",
            get(management::get_rate_limits)
                .post(management::put_rate_limits)
                .put(management::put_rate_limits),
        )
        .route(
            "/alerts/channels",
            get(management::list_alert_channels).post(management::create_alert_channel),
        )
        .route(
            "/alerts/channels/{id}",
            delete(management::delete_alert_channel),
        )
        .route(
            "/alerts/config",
            get(management::list_alert_configs)
                .post(management::put_alert_config)
                .put(management::put_alert_config),
        )
        .route("/analytics/usage", get(management::usage))
        .route(
            "/analytics/recommendations",
            get(management::recommendations),
        )
        .route("/cache/stats", get(management::cache_stats))
        .route("/cache/clear", post(management::cache_clear))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::tenant_auth_middleware,
        ));

    Router::new()
        .route("/healthz", get(health::healthz))
        .merge(authed)
        .layer(middleware::from_fn(request_id::request_id_middleware))
        .with_state(state)
}

/// Build the operator-facing router (ops port).
pub fn ops_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/metrics", get(ops::metrics))
        .layer(middleware::from_fn(request_id::request_id_middleware))
        .with_state(state)
}
