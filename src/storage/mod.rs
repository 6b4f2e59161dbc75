//! Relational store seam.
//!
//! Everything durable — tenants, provider configs, the durable cache tier,
//! the usage ledger, alert configuration — goes through the [`Store`] trait.
//! Production uses [`postgres::PgStore`]; tests use the in-memory
//! implementation so the whole pipeline can run without infrastructure.

pub mod postgres;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ProviderKind;
use crate::secrets::SealedSecret;

/// A tenant (organization). Only the salted hash of its API key is stored.
#[derive(Debug, Clone)]
pub struct TenantRow {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ProviderConfigRow {
    pub id: i64,
    pub org_id: i64,
    pub provider: ProviderKind,
    pub sealed_key: SealedSecret,
    pub enabled: bool,
    /// Lower sorts first when the registry orders failover candidates.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

/// Durable-tier cache entry. The fast tier stores a serialized copy of the
/// same shape under `cache:fast:{fingerprint}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryRow {
    pub fingerprint: String,
    pub prompt_hash: String,
    pub model: String,
    pub response: Value,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub hit_count: i64,
    pub ttl_hours: i64,
}

/// One append-only usage record. Constructors keep the cross-field
/// invariants (`total = prompt + completion`; cache hits bill zero and
/// carry no upstream status).
#[derive(Debug, Clone)]
pub struct LedgerRow {
    pub id: String,
    pub org_id: i64,
    pub ts: DateTime<Utc>,
    pub requested_model: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: f64,
    pub latency_ms: i64,
    pub cache_hit: bool,
    pub cache_key: Option<String>,
    pub endpoint: String,
    pub upstream_status: Option<i32>,
    pub error: Option<String>,
}

impl LedgerRow {
    fn base(org_id: i64, requested_model: &str, endpoint: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            org_id,
            ts: Utc::now(),
            requested_model: requested_model.to_string(),
            provider: None,
            model: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            cost_usd: 0.0,
            latency_ms: 0,
            cache_hit: false,
            cache_key: None,
            endpoint: endpoint.to_string(),
            upstream_status: None,
            error: None,
        }
    }

    /// A successful upstream completion.
    #[allow(clippy::too_many_arguments)]
    pub fn success(
        org_id: i64,
        requested_model: &str,
        endpoint: &str,
        provider: &str,
        model: &str,
        prompt_tokens: u32,
        completion_tokens: u32,
        cost_usd: f64,
        latency_ms: u64,
        cache_key: &str,
    ) -> Self {
        Self {
            provider: Some(provider.to_string()),
            model: Some(model.to_string()),
            prompt_tokens: prompt_tokens as i64,
            completion_tokens: completion_tokens as i64,
            total_tokens: (prompt_tokens + completion_tokens) as i64,
            cost_usd,
            latency_ms: latency_ms as i64,
            cache_key: Some(cache_key.to_string()),
            ..Self::base(org_id, requested_model, endpoint)
        }
    }

    /// A cache hit: zero cost, gateway-internal latency, no upstream status.
    pub fn cache_hit(
        org_id: i64,
        requested_model: &str,
        endpoint: &str,
        provider: &str,
        model: &str,
        latency_ms: u64,
        cache_key: &str,
    ) -> Self {
        Self {
            provider: Some(provider.to_string()),
            model: Some(model.to_string()),
            cache_hit: true,
            latency_ms: latency_ms as i64,
            cache_key: Some(cache_key.to_string()),
            ..Self::base(org_id, requested_model, endpoint)
        }
    }

    /// A terminal failure; `upstream_status` is absent for failures that
    /// never reached a provider (e.g. pipeline timeout).
    pub fn failure(
        org_id: i64,
        requested_model: &str,
        endpoint: &str,
        provider: Option<&str>,
        upstream_status: Option<u16>,
        error: &str,
        latency_ms: u64,
    ) -> Self {
        Self {
            provider: provider.map(str::to_string),
            upstream_status: upstream_status.map(i32::from),
            error: Some(error.to_string()),
            latency_ms: latency_ms as i64,
            ..Self::base(org_id, requested_model, endpoint)
        }
    }

    /// A classify-only request (`/v1/smart/analyze`) — no upstream call.
    pub fn analysis(org_id: i64, requested_model: &str, endpoint: &str, latency_ms: u64) -> Self {
        Self {
            latency_ms: latency_ms as i64,
            ..Self::base(org_id, requested_model, endpoint)
        }
    }
}

/// Router inputs and outputs for one smart-routed request.
#[derive(Debug, Clone)]
pub struct RoutingDecisionRow {
    pub id: String,
    pub org_id: i64,
    pub ts: DateTime<Utc>,
    pub requested_model: String,
    pub selected_model: String,
    pub task_class: String,
    pub reason: String,
    pub estimated_savings: f64,
    pub confidence: f64,
    pub prompt_chars: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfigRow {
    pub org_id: i64,
    pub per_minute: i64,
    pub per_hour: i64,
    pub per_day: i64,
    pub enabled: bool,
}

impl RateLimitConfigRow {
    /// The windows must nest: a per-minute allowance above the hourly or
    /// daily one can never be used.
    pub fn validate(&self) -> Result<(), String> {
        if self.per_minute <= 0 || self.per_hour <= 0 || self.per_day <= 0 {
            return Err("rate limits must be positive".into());
        }
        if self.per_minute > self.per_hour || self.per_hour > self.per_day {
            return Err("limits must satisfy per_minute <= per_hour <= per_day".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    DailyCost,
    MonthlyCost,
    RateLimitWarning,
    CacheHitWarning,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DailyCost => "daily-cost",
            Self::MonthlyCost => "monthly-cost",
            Self::RateLimitWarning => "rate-limit-warning",
            Self::CacheHitWarning => "cache-hit-warning",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily-cost" => Some(Self::DailyCost),
            "monthly-cost" => Some(Self::MonthlyCost),
            "rate-limit-warning" => Some(Self::RateLimitWarning),
            "cache-hit-warning" => Some(Self::CacheHitWarning),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    Email,
    ChatWebhook,
    GenericWebhook,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::ChatWebhook => "chat-webhook",
            Self::GenericWebhook => "generic-webhook",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(Self::Email),
            "chat-webhook" => Some(Self::ChatWebhook),
            "generic-webhook" => Some(Self::GenericWebhook),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct AlertChannelRow {
    pub id: i64,
    pub org_id: i64,
    pub kind: ChannelKind,
    /// Kind-specific settings: `{"to": …}` for email, `{"url": …}` for the
    /// webhook kinds.
    pub config: Value,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct AlertConfigRow {
    pub org_id: i64,
    pub kind: AlertKind,
    pub threshold: f64,
    pub enabled: bool,
    pub last_triggered: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageGroupBy {
    Day,
    Model,
    Provider,
}

impl UsageGroupBy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(Self::Day),
            "model" => Some(Self::Model),
            "provider" => Some(Self::Provider),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageBucket {
    pub key: String,
    pub requests: i64,
    pub cost_usd: f64,
    pub total_tokens: i64,
    pub cache_hits: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutingSummary {
    pub requested_model: String,
    pub selected_model: String,
    pub task_class: String,
    pub requests: i64,
    pub estimated_savings: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DurableCacheStats {
    pub entries: i64,
    pub approx_bytes: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    // ── Tenants ──────────────────────────────────────────────────────────
    async fn insert_tenant(&self, name: &str, api_key_hash: &str) -> anyhow::Result<i64>;
    async fn tenant_by_key_hash(&self, api_key_hash: &str) -> anyhow::Result<Option<TenantRow>>;

    // ── Provider configs ─────────────────────────────────────────────────
    async fn list_provider_configs(&self, org_id: i64) -> anyhow::Result<Vec<ProviderConfigRow>>;
    /// Insert or replace the (tenant, provider) config — the unique
    /// constraint makes a second enabled config for the same kind an update.
    async fn upsert_provider_config(
        &self,
        org_id: i64,
        provider: ProviderKind,
        sealed_key: &SealedSecret,
        enabled: bool,
        priority: i32,
    ) -> anyhow::Result<()>;
    async fn set_provider_state(
        &self,
        org_id: i64,
        provider: ProviderKind,
        enabled: Option<bool>,
        priority: Option<i32>,
    ) -> anyhow::Result<bool>;
    async fn delete_provider_config(
        &self,
        org_id: i64,
        provider: ProviderKind,
    ) -> anyhow::Result<bool>;

    // ── Rate limits ──────────────────────────────────────────────────────
    async fn rate_limit_config(&self, org_id: i64)
        -> anyhow::Result<Option<RateLimitConfigRow>>;
    async fn put_rate_limit_config(&self, cfg: &RateLimitConfigRow) -> anyhow::Result<()>;

    // ── Durable cache tier ───────────────────────────────────────────────
    async fn cache_lookup(&self, fingerprint: &str) -> anyhow::Result<Option<CacheEntryRow>>;
    async fn cache_upsert(&self, row: &CacheEntryRow) -> anyhow::Result<()>;
    async fn cache_touch(&self, fingerprint: &str, now: DateTime<Utc>) -> anyhow::Result<()>;
    /// Delete entries whose fingerprint matches a `*` glob.
    async fn cache_delete_like(&self, pattern: &str) -> anyhow::Result<u64>;
    async fn cache_clear(&self) -> anyhow::Result<u64>;
    async fn cache_stats(&self) -> anyhow::Result<DurableCacheStats>;

    // ── Ledger + analytics ───────────────────────────────────────────────
    async fn insert_ledger_rows(&self, rows: &[LedgerRow]) -> anyhow::Result<()>;
    async fn insert_routing_decision(&self, row: &RoutingDecisionRow) -> anyhow::Result<()>;
    async fn cost_between(
        &self,
        org_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<f64>;
    async fn usage_between(
        &self,
        org_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        group_by: UsageGroupBy,
    ) -> anyhow::Result<Vec<UsageBucket>>;
    /// `(total requests, cache hits)` in the window.
    async fn request_stats_between(
        &self,
        org_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<(i64, i64)>;
    async fn routing_summary(
        &self,
        org_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<RoutingSummary>>;

    // ── Alerts ───────────────────────────────────────────────────────────
    /// Tenants that have at least one enabled alert config, with names.
    async fn orgs_with_enabled_alerts(&self) -> anyhow::Result<Vec<(i64, String)>>;
    async fn alert_configs(&self, org_id: i64) -> anyhow::Result<Vec<AlertConfigRow>>;
    async fn upsert_alert_config(&self, cfg: &AlertConfigRow) -> anyhow::Result<()>;
    async fn stamp_alert_triggered(
        &self,
        org_id: i64,
        kind: AlertKind,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()>;
    async fn alert_channels(&self, org_id: i64) -> anyhow::Result<Vec<AlertChannelRow>>;
    async fn insert_alert_channel(
        &self,
        org_id: i64,
        kind: ChannelKind,
        config: &Value,
        active: bool,
    ) -> anyhow::Result<i64>;
    async fn delete_alert_channel(&self, org_id: i64, channel_id: i64) -> anyhow::Result<bool>;
}
