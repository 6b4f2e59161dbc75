//! Request orchestration: validate → rate-limit → route → cache → dispatch
//! → record.
//!
//! Stages run in a fixed order with early exit on the first failure.
//! Everything after routing is bounded by the pipeline deadline; a deadline
//! expiry is surfaced as `service_unavailable` and still ledgered. Failures
//! after a successful upstream response (cache writes, ledger enqueue)
//! never fail the request.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::backends::ProviderClient;
use crate::cache::Flight;
use crate::error::GatewayError;
use crate::fingerprint::{fingerprint, prompt_hash};
use crate::limiter::{Decision, WindowState};
use crate::metrics::Metrics;
use crate::models::{ChatRequest, ChatResponse, ProviderKind, TokenUsage};
use crate::pricing;
use crate::registry::ProviderCredential;
use crate::routing::{self, RouteMode, RoutePlan};
use crate::state::{AppState, Tenant};
use crate::storage::{LedgerRow, RoutingDecisionRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    ChatCompletions,
    SmartCompletions,
    SmartAnalyze,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Self::ChatCompletions => "/v1/chat/completions",
            Self::SmartCompletions => "/v1/smart/completions",
            Self::SmartAnalyze => "/v1/smart/analyze",
        }
    }
}

/// Gateway metadata attached to every completion response under
/// `x_cognitude`.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMeta {
    pub cached: bool,
    pub cost: f64,
    pub provider: String,
    pub cache_key: String,
    pub latency_ms: u64,
}

/// Extra keys for smart-routing responses.
#[derive(Debug, Clone, Serialize)]
pub struct SmartMeta {
    pub selected_model: String,
    pub complexity_score: f64,
    pub reasoning: String,
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub response: ChatResponse,
    pub meta: GatewayMeta,
    pub smart: Option<SmartMeta>,
    pub rate_windows: Vec<WindowState>,
}

/// Classify-only result for `/v1/smart/analyze`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeOutcome {
    pub task_class: String,
    pub complexity_score: f64,
    pub recommended_model: String,
    pub recommended_provider: String,
}

/// The full completion pipeline for `/v1/chat/completions` and
/// `/v1/smart/completions`.
#[tracing::instrument(skip_all, fields(org_id = tenant.org_id, endpoint = endpoint.path()))]
pub async fn handle_chat(
    state: &Arc<AppState>,
    tenant: &Tenant,
    req: ChatRequest,
    endpoint: Endpoint,
) -> Result<PipelineOutcome, GatewayError> {
    let started = Instant::now();
    Metrics::incr(&state.metrics.requests_total);

    req.validate().map_err(GatewayError::Validation)?;
    let rate_windows = enforce_rate_limit(state, tenant).await?;

    let mode = match endpoint {
        Endpoint::ChatCompletions => RouteMode::Explicit,
        Endpoint::SmartCompletions => state.config.smart_mode(),
        Endpoint::SmartAnalyze => unreachable!("analyze has its own entry point"),
    };

    let plan = build_plan(state, tenant, &req, mode).await?;
    record_routing_decision(state, tenant, &req, &plan).await;

    let smart = plan.classification.map(|cls| SmartMeta {
        selected_model: plan.selected().model.clone(),
        complexity_score: cls.score,
        reasoning: plan.reason.clone(),
    });

    let fp = fingerprint(&req);
    let cache_enabled = state.config.cache.enabled;

    if cache_enabled {
        if let Some(row) = state.cache.get(&fp).await {
            return Ok(cache_hit_outcome(
                state,
                tenant,
                &req,
                endpoint,
                row,
                started,
                rate_windows,
                smart,
            )
            .await);
        }
    }

    // Everything from here on can block on upstreams; bound it by the
    // remaining pipeline budget.
    let budget = state
        .config
        .pipeline_timeout()
        .saturating_sub(started.elapsed());
    let dispatched = tokio::time::timeout(
        budget,
        dispatch_with_cache(
            state,
            tenant,
            &req,
            endpoint,
            &plan,
            &fp,
            started,
            cache_enabled,
        ),
    )
    .await;

    match dispatched {
        Ok(result) => {
            let mut outcome = result?;
            outcome.smart = smart;
            outcome.rate_windows = rate_windows;
            Ok(outcome)
        }
        Err(_) => {
            state
                .ledger
                .record(LedgerRow::failure(
                    tenant.org_id,
                    &req.model,
                    endpoint.path(),
                    None,
                    None,
                    "pipeline deadline exceeded",
                    started.elapsed().as_millis() as u64,
                ))
                .await;
            Err(GatewayError::Timeout)
        }
    }
}

/// Classify-only path for `/v1/smart/analyze` — no fingerprint, no cache,
/// no upstream call.
pub async fn handle_analyze(
    state: &Arc<AppState>,
    tenant: &Tenant,
    req: ChatRequest,
) -> Result<(AnalyzeOutcome, Vec<WindowState>), GatewayError> {
    let started = Instant::now();
    Metrics::incr(&state.metrics.requests_total);

    req.validate().map_err(GatewayError::Validation)?;
    let rate_windows = enforce_rate_limit(state, tenant).await?;

    let plan = build_plan(state, tenant, &req, RouteMode::Cost).await?;
    let cls = plan
        .classification
        .expect("cost mode always classifies");

    state
        .ledger
        .record(LedgerRow::analysis(
            tenant.org_id,
            &req.model,
            Endpoint::SmartAnalyze.path(),
            started.elapsed().as_millis() as u64,
        ))
        .await;

    Ok((
        AnalyzeOutcome {
            task_class: cls.class.as_str().to_string(),
            complexity_score: cls.score,
            recommended_model: plan.selected().model.clone(),
            recommended_provider: plan.selected().provider.as_str().to_string(),
        },
        rate_windows,
    ))
}

/// Count the request against the tenant's windows. A limiter
/// backend failure fails open — availability over precision.
async fn enforce_rate_limit(
    state: &Arc<AppState>,
    tenant: &Tenant,
) -> Result<Vec<WindowState>, GatewayError> {
    let cfg = match state.store.rate_limit_config(tenant.org_id).await {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(org_id = tenant.org_id, error = %e, "rate limit config read failed — allowing");
            return Ok(Vec::new());
        }
    };
    let Some(cfg) = cfg else {
        return Ok(Vec::new());
    };

    match state
        .limiter
        .check(tenant.org_id, &cfg, Utc::now().timestamp())
        .await
    {
        Ok(Decision::Allowed(windows)) => Ok(windows),
        Ok(Decision::Denied { retry_after, .. }) => {
            Metrics::incr(&state.metrics.rate_limited_total);
            Err(GatewayError::RateLimited {
                message: "rate limit exceeded for this organization".into(),
                retry_after,
            })
        }
        Err(e) => {
            warn!(org_id = tenant.org_id, error = %e, "rate limiter unavailable — allowing");
            Ok(Vec::new())
        }
    }
}

async fn build_plan(
    state: &Arc<AppState>,
    tenant: &Tenant,
    req: &ChatRequest,
    mode: RouteMode,
) -> Result<RoutePlan, GatewayError> {
    let enabled = state
        .registry
        .enabled_kinds(tenant.org_id)
        .await
        .map_err(GatewayError::Internal)?;
    routing::plan(req, mode, &enabled).map_err(|e| match e {
        routing::RouteError::NoProviders => GatewayError::Validation(e.to_string()),
        routing::RouteError::NoProviderForModel(_) => GatewayError::NotFound(e.to_string()),
    })
}

/// Persist the router's inputs/outputs for smart-routed requests.
/// Best-effort: analytics loss must not fail the request.
async fn record_routing_decision(
    state: &Arc<AppState>,
    tenant: &Tenant,
    req: &ChatRequest,
    plan: &RoutePlan,
) {
    let Some(cls) = plan.classification else {
        return;
    };
    let row = RoutingDecisionRow {
        id: uuid::Uuid::new_v4().to_string(),
        org_id: tenant.org_id,
        ts: Utc::now(),
        requested_model: plan.requested_model.clone(),
        selected_model: plan.selected().model.clone(),
        task_class: cls.class.as_str().to_string(),
        reason: plan.reason.clone(),
        estimated_savings: plan.estimated_savings,
        confidence: cls.confidence,
        prompt_chars: cls.prompt_chars as i64,
    };
    if let Err(e) = state.store.insert_routing_decision(&row).await {
        warn!(org_id = tenant.org_id, error = %e, "routing decision not persisted");
    }
}

/// The deadline-bounded tail of the pipeline: single-flight, upstream
/// dispatch with failover, cache/ledger recording.
#[allow(clippy::too_many_arguments)]
async fn dispatch_with_cache(
    state: &Arc<AppState>,
    tenant: &Tenant,
    req: &ChatRequest,
    endpoint: Endpoint,
    plan: &RoutePlan,
    fp: &str,
    started: Instant,
    cache_enabled: bool,
) -> Result<PipelineOutcome, GatewayError> {
    if !cache_enabled {
        return dispatch_upstream(state, tenant, req, endpoint, plan, fp, started, false).await;
    }

    match state.cache.join_flight(fp).await {
        Flight::Hit(row) => Ok(cache_hit_outcome(
            state,
            tenant,
            req,
            endpoint,
            row,
            started,
            Vec::new(),
            None,
        )
        .await),
        Flight::Leader(_guard) => {
            // Guard held across the upstream call; dropped on return, which
            // releases the flight and wakes any followers.
            dispatch_upstream(state, tenant, req, endpoint, plan, fp, started, true).await
        }
        Flight::TimedOut => {
            dispatch_upstream(state, tenant, req, endpoint, plan, fp, started, true).await
        }
    }
}

/// Walk the plan's attempts with failover. Transient and model-transient
/// errors move to the next attempt; permanent errors surface immediately.
#[allow(clippy::too_many_arguments)]
async fn dispatch_upstream(
    state: &Arc<AppState>,
    tenant: &Tenant,
    req: &ChatRequest,
    endpoint: Endpoint,
    plan: &RoutePlan,
    fp: &str,
    started: Instant,
    cache_result: bool,
) -> Result<PipelineOutcome, GatewayError> {
    let credentials = state
        .registry
        .resolve(tenant.org_id, Some(plan.selected().provider))
        .await
        .map_err(GatewayError::Internal)?;

    let mut last_error: Option<crate::backends::UpstreamError> = None;
    let mut last_provider: Option<ProviderKind> = None;
    let mut tried = 0u32;

    for attempt in &plan.attempts {
        let Some(credential) = credentials.iter().find(|c| c.provider == attempt.provider)
        else {
            debug!(provider = %attempt.provider, "no credential for planned attempt — skipping");
            continue;
        };

        tried += 1;
        last_provider = Some(attempt.provider);
        match call_provider(state, credential, req, &attempt.model).await {
            Ok(response) => {
                if tried > 1 {
                    Metrics::incr(&state.metrics.failovers_total);
                }
                return Ok(finish_success(
                    state,
                    tenant,
                    req,
                    endpoint,
                    attempt.provider,
                    &attempt.model,
                    response,
                    fp,
                    started,
                    cache_result,
                )
                .await);
            }
            Err(e) if e.retryable() => {
                Metrics::incr(&state.metrics.upstream_errors_total);
                warn!(provider = %attempt.provider, model = %attempt.model,
                      class = ?e.class, error = %e, "upstream attempt failed — failing over");
                last_error = Some(e);
            }
            Err(e) => {
                Metrics::incr(&state.metrics.upstream_errors_total);
                state
                    .ledger
                    .record(LedgerRow::failure(
                        tenant.org_id,
                        &req.model,
                        endpoint.path(),
                        Some(attempt.provider.as_str()),
                        e.status,
                        &e.message,
                        started.elapsed().as_millis() as u64,
                    ))
                    .await;
                return Err(GatewayError::Upstream(e.message));
            }
        }
    }

    let message = match last_error {
        Some(ref e) => e.to_string(),
        None => "no usable provider credential for the routed attempts".to_string(),
    };
    state
        .ledger
        .record(LedgerRow::failure(
            tenant.org_id,
            &req.model,
            endpoint.path(),
            last_provider.map(|p| p.as_str()),
            last_error.as_ref().and_then(|e| e.status),
            &message,
            started.elapsed().as_millis() as u64,
        ))
        .await;
    Err(GatewayError::Upstream(message))
}

async fn call_provider(
    state: &Arc<AppState>,
    credential: &ProviderCredential,
    req: &ChatRequest,
    model: &str,
) -> Result<ChatResponse, crate::backends::UpstreamError> {
    let client = ProviderClient::new(
        credential.provider,
        credential.api_key.clone(),
        state.config.request_timeout(),
        state.config.upstream_base_url(credential.provider),
    )?;
    client.chat(req, model).await
}

/// Success bookkeeping: cache put (best-effort) + ledger row with real
/// token counts and cost.
#[allow(clippy::too_many_arguments)]
async fn finish_success(
    state: &Arc<AppState>,
    tenant: &Tenant,
    req: &ChatRequest,
    endpoint: Endpoint,
    provider: ProviderKind,
    model: &str,
    response: ChatResponse,
    fp: &str,
    started: Instant,
    cache_result: bool,
) -> PipelineOutcome {
    let cost = pricing::cost(
        provider,
        model,
        response.usage.prompt_tokens,
        response.usage.completion_tokens,
    );
    let latency_ms = started.elapsed().as_millis() as u64;
    if response.usage_estimated {
        debug!(%provider, model, "provider omitted usage — billed on estimated tokens");
    }

    if cache_result {
        match serde_json::to_value(&response) {
            Ok(payload) => {
                if let Err(e) = state.cache.put(fp, &prompt_hash(req), model, &payload).await {
                    warn!(error = %e, "response not cached");
                }
            }
            Err(e) => warn!(error = %e, "response not serializable for cache"),
        }
    }

    state
        .ledger
        .record(LedgerRow::success(
            tenant.org_id,
            &req.model,
            endpoint.path(),
            provider.as_str(),
            model,
            response.usage.prompt_tokens,
            response.usage.completion_tokens,
            cost,
            latency_ms,
            fp,
        ))
        .await;

    PipelineOutcome {
        response,
        meta: GatewayMeta {
            cached: false,
            cost,
            provider: provider.as_str().to_string(),
            cache_key: fp.to_string(),
            latency_ms,
        },
        smart: None,
        rate_windows: Vec::new(),
    }
}

/// Cache-hit bookkeeping: zero cost, gateway-internal latency, touch +
/// ledger.
#[allow(clippy::too_many_arguments)]
async fn cache_hit_outcome(
    state: &Arc<AppState>,
    tenant: &Tenant,
    req: &ChatRequest,
    endpoint: Endpoint,
    row: crate::storage::CacheEntryRow,
    started: Instant,
    rate_windows: Vec<WindowState>,
    smart: Option<SmartMeta>,
) -> PipelineOutcome {
    // Provider is not part of the cache entry; recover it from model
    // ownership. The saved-cost estimate prices the stored usage.
    let (provider, saved) = match pricing::owners(&row.model).first() {
        Some(spec) => {
            let usage = stored_usage(&row.response);
            (
                spec.provider.as_str().to_string(),
                pricing::cost(
                    spec.provider,
                    &row.model,
                    usage.prompt_tokens,
                    usage.completion_tokens,
                ),
            )
        }
        None => ("cache".to_string(), 0.0),
    };

    state.cache.touch(&row, saved).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    state
        .ledger
        .record(LedgerRow::cache_hit(
            tenant.org_id,
            &req.model,
            endpoint.path(),
            &provider,
            &row.model,
            latency_ms,
            &row.fingerprint,
        ))
        .await;

    let response = serde_json::from_value::<ChatResponse>(row.response.clone())
        .unwrap_or_else(|e| {
            // A durable payload that no longer parses should never happen;
            // synthesize an empty-but-valid response rather than 500ing.
            warn!(fingerprint = %row.fingerprint, error = %e, "stored payload unparseable");
            ChatResponse {
                id: format!("gen-{}", uuid::Uuid::new_v4()),
                object: "chat.completion".into(),
                created: Utc::now().timestamp(),
                model: row.model.clone(),
                choices: Vec::new(),
                usage: TokenUsage::default(),
                usage_estimated: true,
            }
        });

    PipelineOutcome {
        response,
        meta: GatewayMeta {
            cached: true,
            cost: 0.0,
            provider,
            cache_key: row.fingerprint.clone(),
            latency_ms,
        },
        smart,
        rate_windows,
    }
}

/// Usage block from a stored payload, zero when absent.
fn stored_usage(payload: &Value) -> TokenUsage {
    payload
        .get("usage")
        .and_then(|u| serde_json::from_value(u.clone()).ok())
        .unwrap_or_default()
}
