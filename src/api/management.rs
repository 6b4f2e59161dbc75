//! Tenant management surface: providers, rate limits, alerts, analytics,
//! cache administration.
//!
//! Every handler runs behind the tenant auth middleware and operates only
//! on the authenticated tenant's rows. Provider API keys are accepted on
//! write and never returned on read.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::cache::ClearScope;
use crate::error::GatewayError;
use crate::models::ProviderKind;
use crate::state::{AppState, Tenant};
use crate::storage::{AlertConfigRow, AlertKind, ChannelKind, RateLimitConfigRow, UsageGroupBy};

// ── Providers ────────────────────────────────────────────────────────────

pub async fn list_providers(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<Tenant>,
) -> Result<Json<Value>, GatewayError> {
    let rows = state
        .registry
        .list(tenant.org_id)
        .await
        .map_err(GatewayError::Internal)?;
    // Sealed credentials stay server-side; only the shape is reported.
    let providers: Vec<Value> = rows
        .iter()
        .map(|r| {
            json!({
                "provider": r.provider.as_str(),
                "enabled": r.enabled,
                "priority": r.priority,
                "created_at": r.created_at.to_rfc3339(),
            })
        })
        .collect();
    Ok(Json(json!({ "providers": providers })))
}

#[derive(Deserialize)]
pub struct CreateProviderBody {
    provider: String,
    api_key: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default = "default_priority")]
    priority: i32,
}

fn default_enabled() -> bool {
    true
}
fn default_priority() -> i32 {
    100
}

pub async fn create_provider(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<Tenant>,
    Json(body): Json<CreateProviderBody>,
) -> Result<impl IntoResponse, GatewayError> {
    let kind = parse_provider(&body.provider)?;
    if body.api_key.trim().is_empty() {
        return Err(GatewayError::Validation("api_key must not be empty".into()));
    }
    state
        .registry
        .upsert(tenant.org_id, kind, &body.api_key, body.enabled, body.priority)
        .await
        .map_err(GatewayError::Internal)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "provider": kind.as_str(), "enabled": body.enabled })),
    ))
}

#[derive(Deserialize)]
pub struct UpdateProviderBody {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    priority: Option<i32>,
}

pub async fn update_provider(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<Tenant>,
    Path(provider): Path<String>,
    Json(body): Json<UpdateProviderBody>,
) -> Result<Json<Value>, GatewayError> {
    let kind = parse_provider(&provider)?;

    let updated = match body.api_key {
        // Rotating the key goes through a full re-seal.
        Some(api_key) => {
            let rows = state
                .registry
                .list(tenant.org_id)
                .await
                .map_err(GatewayError::Internal)?;
            let Some(current) = rows.iter().find(|r| r.provider == kind) else {
                return Err(GatewayError::NotFound(format!(
                    "no `{kind}` provider configured"
                )));
            };
            state
                .registry
                .upsert(
                    tenant.org_id,
                    kind,
                    &api_key,
                    body.enabled.unwrap_or(current.enabled),
                    body.priority.unwrap_or(current.priority),
                )
                .await
                .map_err(GatewayError::Internal)?;
            true
        }
        None => state
            .registry
            .set_state(tenant.org_id, kind, body.enabled, body.priority)
            .await
            .map_err(GatewayError::Internal)?,
    };

    if !updated {
        return Err(GatewayError::NotFound(format!(
            "no `{kind}` provider configured"
        )));
    }
    Ok(Json(json!({ "provider": kind.as_str(), "updated": true })))
}

pub async fn delete_provider(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<Tenant>,
    Path(provider): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let kind = parse_provider(&provider)?;
    let removed = state
        .registry
        .delete(tenant.org_id, kind)
        .await
        .map_err(GatewayError::Internal)?;
    if !removed {
        return Err(GatewayError::NotFound(format!(
            "no `{kind}` provider configured"
        )));
    }
    Ok(Json(json!({ "provider": kind.as_str(), "deleted": true })))
}

fn parse_provider(s: &str) -> Result<ProviderKind, GatewayError> {
    ProviderKind::parse(s).ok_or_else(|| {
        GatewayError::Validation(format!(
            "unknown provider `{s}`; expected one of openai, anthropic, mistral, groq"
        ))
    })
}

// ── Rate limits ──────────────────────────────────────────────────────────

pub async fn get_rate_limits(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<Tenant>,
) -> Result<Json<Value>, GatewayError> {
    match state
        .store
        .rate_limit_config(tenant.org_id)
        .await
        .map_err(GatewayError::Internal)?
    {
        Some(cfg) => Ok(Json(json!({
            "requests_per_minute": cfg.per_minute,
            "requests_per_hour": cfg.per_hour,
            "requests_per_day": cfg.per_day,
            "enabled": cfg.enabled,
        }))),
        None => Err(GatewayError::NotFound(
            "no rate limit configured for this organization".into(),
        )),
    }
}

#[derive(Deserialize)]
pub struct RateLimitBody {
    requests_per_minute: i64,
    requests_per_hour: i64,
    requests_per_day: i64,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

pub async fn put_rate_limits(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<Tenant>,
    Json(body): Json<RateLimitBody>,
) -> Result<Json<Value>, GatewayError> {
    let cfg = RateLimitConfigRow {
        org_id: tenant.org_id,
        per_minute: body.requests_per_minute,
        per_hour: body.requests_per_hour,
        per_day: body.requests_per_day,
        enabled: body.enabled,
    };
    cfg.validate().map_err(GatewayError::Validation)?;
    state
        .store
        .put_rate_limit_config(&cfg)
        .await
        .map_err(GatewayError::Internal)?;
    Ok(Json(json!({ "updated": true })))
}

// ── Alert channels + configs ─────────────────────────────────────────────

pub async fn list_alert_channels(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<Tenant>,
) -> Result<Json<Value>, GatewayError> {
    let channels: Vec<Value> = state
        .store
        .alert_channels(tenant.org_id)
        .await
        .map_err(GatewayError::Internal)?
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "kind": c.kind.as_str(),
                "config": c.config,
                "active": c.active,
            })
        })
        .collect();
    Ok(Json(json!({ "channels": channels })))
}

#[derive(Deserialize)]
pub struct CreateChannelBody {
    kind: String,
    config: Value,
    #[serde(default = "default_enabled")]
    active: bool,
}

pub async fn create_alert_channel(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<Tenant>,
    Json(body): Json<CreateChannelBody>,
) -> Result<impl IntoResponse, GatewayError> {
    let kind = ChannelKind::parse(&body.kind).ok_or_else(|| {
        GatewayError::Validation(format!(
            "unknown channel kind `{}`; expected email, chat-webhook, or generic-webhook",
            body.kind
        ))
    })?;
    validate_channel_config(kind, &body.config)?;

    let id = state
        .store
        .insert_alert_channel(tenant.org_id, kind, &body.config, body.active)
        .await
        .map_err(GatewayError::Internal)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

fn validate_channel_config(kind: ChannelKind, config: &Value) -> Result<(), GatewayError> {
    let required = match kind {
        ChannelKind::Email => "to",
        ChannelKind::ChatWebhook | ChannelKind::GenericWebhook => "url",
    };
    if config.get(required).and_then(|v| v.as_str()).is_none() {
        return Err(GatewayError::Validation(format!(
            "{kind} channel config requires a `{required}` string"
        )));
    }
    Ok(())
}

pub async fn delete_alert_channel(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<Tenant>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, GatewayError> {
    let removed = state
        .store
        .delete_alert_channel(tenant.org_id, id)
        .await
        .map_err(GatewayError::Internal)?;
    if !removed {
        return Err(GatewayError::NotFound(format!("no alert channel {id}")));
    }
    Ok(Json(json!({ "deleted": true })))
}

pub async fn list_alert_configs(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<Tenant>,
) -> Result<Json<Value>, GatewayError> {
    let configs: Vec<Value> = state
        .store
        .alert_configs(tenant.org_id)
        .await
        .map_err(GatewayError::Internal)?
        .iter()
        .map(|c| {
            json!({
                "kind": c.kind.as_str(),
                "threshold": c.threshold,
                "enabled": c.enabled,
                "last_triggered": c.last_triggered.map(|t| t.to_rfc3339()),
            })
        })
        .collect();
    Ok(Json(json!({ "configs": configs })))
}

#[derive(Deserialize)]
pub struct AlertConfigBody {
    kind: String,
    threshold: f64,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

pub async fn put_alert_config(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<Tenant>,
    Json(body): Json<AlertConfigBody>,
) -> Result<Json<Value>, GatewayError> {
    let kind = AlertKind::parse(&body.kind).ok_or_else(|| {
        GatewayError::Validation(format!(
            "unknown alert kind `{}`; expected daily-cost, monthly-cost, \
             rate-limit-warning, or cache-hit-warning",
            body.kind
        ))
    })?;
    if body.threshold <= 0.0 {
        return Err(GatewayError::Validation(
            "threshold must be positive".into(),
        ));
    }
    state
        .store
        .upsert_alert_config(&AlertConfigRow {
            org_id: tenant.org_id,
            kind,
            threshold: body.threshold,
            enabled: body.enabled,
            last_triggered: None,
        })
        .await
        .map_err(GatewayError::Internal)?;
    Ok(Json(json!({ "kind": kind.as_str(), "updated": true })))
}

// ── Analytics ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct UsageQuery {
    #[serde(default)]
    start: Option<DateTime<Utc>>,
    #[serde(default)]
    end: Option<DateTime<Utc>>,
    #[serde(default)]
    group_by: Option<String>,
}

pub async fn usage(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<Tenant>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<Value>, GatewayError> {
    let end = query.end.unwrap_or_else(Utc::now);
    let start = query.start.unwrap_or(end - Duration::days(30));
    let group_by = match query.group_by.as_deref() {
        None => UsageGroupBy::Day,
        Some(s) => UsageGroupBy::parse(s).ok_or_else(|| {
            GatewayError::Validation(format!(
                "unknown group_by `{s}`; expected day, model, or provider"
            ))
        })?,
    };

    let buckets = state
        .store
        .usage_between(tenant.org_id, start, end, group_by)
        .await
        .map_err(GatewayError::Internal)?;
    let total_cost: f64 = buckets.iter().map(|b| b.cost_usd).sum();
    let total_requests: i64 = buckets.iter().map(|b| b.requests).sum();

    Ok(Json(json!({
        "start": start.to_rfc3339(),
        "end": end.to_rfc3339(),
        "total_cost_usd": crate::pricing::round6(total_cost),
        "total_requests": total_requests,
        "buckets": buckets,
    })))
}

/// Downgrade suggestions from persisted routing decisions: where smart
/// routing diverged from the requested model, what it saved.
pub async fn recommendations(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<Tenant>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<Value>, GatewayError> {
    let end = query.end.unwrap_or_else(Utc::now);
    let start = query.start.unwrap_or(end - Duration::days(30));

    let summary = state
        .store
        .routing_summary(tenant.org_id, start, end)
        .await
        .map_err(GatewayError::Internal)?;

    let suggestions: Vec<&crate::storage::RoutingSummary> = summary
        .iter()
        .filter(|row| row.requested_model != row.selected_model)
        .collect();
    let total_savings: f64 = suggestions.iter().map(|r| r.estimated_savings).sum();

    Ok(Json(json!({
        "start": start.to_rfc3339(),
        "end": end.to_rfc3339(),
        "total_estimated_savings_usd": crate::pricing::round6(total_savings),
        "suggestions": suggestions,
    })))
}

// ── Cache administration ─────────────────────────────────────────────────

pub async fn cache_stats(
    State(state): State<Arc<AppState>>,
    Extension(_tenant): Extension<Tenant>,
) -> Result<Json<Value>, GatewayError> {
    let stats = state.cache.stats().await.map_err(GatewayError::Internal)?;
    Ok(Json(json!(stats)))
}

#[derive(Deserialize, Default)]
pub struct CacheClearBody {
    #[serde(default)]
    scope: Option<String>,
    /// Optional fingerprint glob; when present only matching entries are
    /// invalidated and `scope` is ignored.
    #[serde(default)]
    pattern: Option<String>,
}

pub async fn cache_clear(
    State(state): State<Arc<AppState>>,
    Extension(_tenant): Extension<Tenant>,
    body: Option<Json<CacheClearBody>>,
) -> Result<Json<Value>, GatewayError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let removed = match body.pattern {
        Some(pattern) => state
            .cache
            .invalidate(&pattern)
            .await
            .map_err(GatewayError::Internal)?,
        None => {
            let scope = match body.scope.as_deref() {
                None => ClearScope::All,
                Some(s) => ClearScope::parse(s).ok_or_else(|| {
                    GatewayError::Validation(format!(
                        "unknown scope `{s}`; expected fast, durable, or all"
                    ))
                })?,
            };
            state
                .cache
                .clear(scope)
                .await
                .map_err(GatewayError::Internal)?
        }
    };

    Ok(Json(json!({ "cleared": removed })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TwoTierCache;
    use crate::config::Config;
    use crate::kv::MemoryKv;
    use crate::ledger::{spawn_ledger, LedgerSettings};
    use crate::limiter::SlidingWindowLimiter;
    use crate::metrics::Metrics;
    use crate::registry::ProviderRegistry;
    use crate::secrets::SecretBox;
    use crate::storage::memory::MemStore;
    use crate::storage::Store;

    async fn test_state() -> (Arc<AppState>, Tenant) {
        let store: Arc<MemStore> = Arc::new(MemStore::new());
        let kv = Arc::new(MemoryKv::new());
        let metrics = Arc::new(Metrics::default());
        let config = Arc::new(Config::default());
        let org_id = store.insert_tenant("acme", "hash").await.unwrap();
        let (ledger, _task) =
            spawn_ledger(store.clone(), metrics.clone(), LedgerSettings::default());
        let state = Arc::new(AppState {
            config,
            store: store.clone(),
            kv: kv.clone(),
            cache: Arc::new(TwoTierCache::new(
                kv.clone(),
                store.clone(),
                metrics.clone(),
                1,
            )),
            registry: ProviderRegistry::new(
                store.clone(),
                Arc::new(SecretBox::from_passphrase("test").unwrap()),
            ),
            limiter: SlidingWindowLimiter::new(kv),
            ledger,
            metrics,
            api_key_salt: "salt".into(),
            started_at: std::time::Instant::now(),
            ops_token: None,
        });
        (
            state,
            Tenant {
                org_id,
                name: "acme".into(),
            },
        )
    }

    // -----------------------------------------------------------------------
    // update_provider — key rotation vs state-only update
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn rotating_the_key_preserves_enabled_and_priority() {
        let (state, tenant) = test_state().await;
        state
            .registry
            .upsert(tenant.org_id, ProviderKind::OpenAi, "sk-old", false, 7)
            .await
            .unwrap();

        update_provider(
            State(state.clone()),
            Extension(tenant.clone()),
            Path("openai".into()),
            Json(UpdateProviderBody {
                api_key: Some("sk-new".into()),
                enabled: None,
                priority: None,
            }),
        )
        .await
        .unwrap();

        let row = &state.registry.list(tenant.org_id).await.unwrap()[0];
        assert!(!row.enabled, "rotation must not flip the enabled flag");
        assert_eq!(row.priority, 7, "rotation must not reset the priority");

        // The new key is the one that decrypts. Resolve skips disabled rows,
        // so re-enable first.
        state
            .registry
            .set_state(tenant.org_id, ProviderKind::OpenAi, Some(true), None)
            .await
            .unwrap();
        let creds = state.registry.resolve(tenant.org_id, None).await.unwrap();
        assert_eq!(creds[0].api_key, "sk-new");
    }

    #[tokio::test]
    async fn state_only_update_keeps_the_stored_key() {
        let (state, tenant) = test_state().await;
        state
            .registry
            .upsert(tenant.org_id, ProviderKind::OpenAi, "sk-keep", true, 1)
            .await
            .unwrap();

        update_provider(
            State(state.clone()),
            Extension(tenant.clone()),
            Path("openai".into()),
            Json(UpdateProviderBody {
                api_key: None,
                enabled: Some(true),
                priority: Some(42),
            }),
        )
        .await
        .unwrap();

        let row = &state.registry.list(tenant.org_id).await.unwrap()[0];
        assert_eq!(row.priority, 42);
        let creds = state.registry.resolve(tenant.org_id, None).await.unwrap();
        assert_eq!(creds[0].api_key, "sk-keep");
    }

    #[tokio::test]
    async fn updating_an_unconfigured_provider_is_not_found() {
        let (state, tenant) = test_state().await;
        for body in [
            UpdateProviderBody {
                api_key: Some("sk".into()),
                enabled: None,
                priority: None,
            },
            UpdateProviderBody {
                api_key: None,
                enabled: Some(false),
                priority: None,
            },
        ] {
            let err = update_provider(
                State(state.clone()),
                Extension(tenant.clone()),
                Path("groq".into()),
                Json(body),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, GatewayError::NotFound(_)));
        }
    }

    #[tokio::test]
    async fn unknown_provider_name_is_rejected_before_any_lookup() {
        let (state, tenant) = test_state().await;
        let err = update_provider(
            State(state),
            Extension(tenant),
            Path("ollama".into()),
            Json(UpdateProviderBody {
                api_key: None,
                enabled: Some(true),
                priority: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    // -----------------------------------------------------------------------
    // Channel config validation
    // -----------------------------------------------------------------------

    #[test]
    fn email_channel_requires_a_to_address() {
        let err =
            validate_channel_config(ChannelKind::Email, &json!({"url": "https://x"})).unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
        assert!(
            validate_channel_config(ChannelKind::Email, &json!({"to": "ops@example.com"})).is_ok()
        );
    }

    #[test]
    fn webhook_channels_require_a_url() {
        for kind in [ChannelKind::ChatWebhook, ChannelKind::GenericWebhook] {
            let err = validate_channel_config(kind, &json!({"to": "ops@example.com"}))
                .unwrap_err();
            assert!(matches!(err, GatewayError::Validation(_)), "{kind} accepted a url-less config");
            assert!(validate_channel_config(kind, &json!({"url": "https://hook"})).is_ok());
        }
    }

    #[test]
    fn non_string_required_field_is_rejected() {
        let err =
            validate_channel_config(ChannelKind::ChatWebhook, &json!({"url": 123})).unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    // -----------------------------------------------------------------------
    // cache_clear — pattern precedence + scope parsing
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn pattern_wins_over_scope() {
        let (state, tenant) = test_state().await;
        let payload = json!({"id": "r", "choices": []});
        state.cache.put("aaa111", "ph", "m", &payload).await.unwrap();
        state.cache.put("bbb222", "ph", "m", &payload).await.unwrap();

        // If `scope` were honoured this would wipe the whole durable tier.
        cache_clear(
            State(state.clone()),
            Extension(tenant),
            Some(Json(CacheClearBody {
                scope: Some("durable".into()),
                pattern: Some("aaa*".into()),
            })),
        )
        .await
        .unwrap();

        assert!(state.store.cache_lookup("aaa111").await.unwrap().is_none());
        assert!(
            state.store.cache_lookup("bbb222").await.unwrap().is_some(),
            "pattern invalidation must not honour the scope field"
        );
    }

    #[tokio::test]
    async fn unknown_scope_is_rejected() {
        let (state, tenant) = test_state().await;
        let err = cache_clear(
            State(state),
            Extension(tenant),
            Some(Json(CacheClearBody {
                scope: Some("everything".into()),
                pattern: None,
            })),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn missing_body_clears_both_tiers() {
        let (state, tenant) = test_state().await;
        let payload = json!({"id": "r", "choices": []});
        state.cache.put("fp1", "ph", "m", &payload).await.unwrap();

        let Json(out) = cache_clear(State(state.clone()), Extension(tenant), None)
            .await
            .unwrap();
        assert!(out["cleared"].as_u64().unwrap() >= 1);
        assert!(state.cache.get("fp1").await.is_none());
    }

    // -----------------------------------------------------------------------
    // Rate-limit config validation wiring
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn inverted_rate_limit_windows_are_rejected() {
        let (state, tenant) = test_state().await;
        let err = put_rate_limits(
            State(state),
            Extension(tenant),
            Json(RateLimitBody {
                requests_per_minute: 100,
                requests_per_hour: 10,
                requests_per_day: 1000,
                enabled: true,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn rate_limit_round_trips_through_get() {
        let (state, tenant) = test_state().await;

        let err = get_rate_limits(State(state.clone()), Extension(tenant.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));

        put_rate_limits(
            State(state.clone()),
            Extension(tenant.clone()),
            Json(RateLimitBody {
                requests_per_minute: 10,
                requests_per_hour: 100,
                requests_per_day: 1000,
                enabled: true,
            }),
        )
        .await
        .unwrap();

        let Json(cfg) = get_rate_limits(State(state), Extension(tenant)).await.unwrap();
        assert_eq!(cfg["requests_per_minute"], 10);
        assert_eq!(cfg["enabled"], true);
    }
}
