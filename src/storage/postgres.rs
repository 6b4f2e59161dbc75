//! PostgreSQL [`Store`] implementation.
//!
//! All queries go through the runtime `sqlx` API — no compile-time schema
//! coupling. The schema is created with `CREATE TABLE IF NOT EXISTS` during
//! [`PgStore::connect`]; an unreachable database or a failed statement is a
//! fatal startup error, surfaced to `main` and turned into a non-zero exit.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{QueryBuilder, Row};
use tracing::info;

use crate::models::ProviderKind;
use crate::secrets::SealedSecret;

use super::{
    AlertChannelRow, AlertConfigRow, AlertKind, CacheEntryRow, ChannelKind, DurableCacheStats,
    LedgerRow, ProviderConfigRow, RateLimitConfigRow, RoutingDecisionRow, RoutingSummary, Store,
    TenantRow, UsageBucket, UsageGroupBy,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS organizations (
    id            BIGSERIAL PRIMARY KEY,
    name          TEXT NOT NULL UNIQUE,
    api_key_hash  TEXT NOT NULL UNIQUE,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS provider_configs (
    id                  BIGSERIAL PRIMARY KEY,
    org_id              BIGINT NOT NULL REFERENCES organizations(id),
    provider            TEXT NOT NULL,
    api_key_ciphertext  JSONB NOT NULL,
    enabled             BOOLEAN NOT NULL DEFAULT TRUE,
    priority            INTEGER NOT NULL DEFAULT 100,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (org_id, provider)
);

CREATE TABLE IF NOT EXISTS cache_entries (
    fingerprint    TEXT PRIMARY KEY,
    prompt_hash    TEXT NOT NULL,
    model          TEXT NOT NULL,
    response       JSONB NOT NULL,
    created_at     TIMESTAMPTZ NOT NULL,
    last_accessed  TIMESTAMPTZ NOT NULL,
    hit_count      BIGINT NOT NULL DEFAULT 0,
    ttl_hours      BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS ledger (
    id                 TEXT PRIMARY KEY,
    org_id             BIGINT NOT NULL REFERENCES organizations(id),
    ts                 TIMESTAMPTZ NOT NULL,
    requested_model    TEXT NOT NULL,
    provider           TEXT,
    model              TEXT,
    prompt_tokens      BIGINT NOT NULL,
    completion_tokens  BIGINT NOT NULL,
    total_tokens       BIGINT NOT NULL,
    cost_usd           DOUBLE PRECISION NOT NULL,
    latency_ms         BIGINT NOT NULL,
    cache_hit          BOOLEAN NOT NULL,
    cache_key          TEXT,
    endpoint           TEXT NOT NULL,
    upstream_status    INTEGER,
    error              TEXT
);
CREATE INDEX IF NOT EXISTS ledger_org_ts_idx ON ledger (org_id, ts);

CREATE TABLE IF NOT EXISTS routing_decisions (
    id                 TEXT PRIMARY KEY,
    org_id             BIGINT NOT NULL REFERENCES organizations(id),
    ts                 TIMESTAMPTZ NOT NULL,
    requested_model    TEXT NOT NULL,
    selected_model     TEXT NOT NULL,
    task_class         TEXT NOT NULL,
    reason             TEXT NOT NULL,
    estimated_savings  DOUBLE PRECISION NOT NULL,
    confidence         DOUBLE PRECISION NOT NULL,
    prompt_chars       BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS routing_decisions_org_ts_idx ON routing_decisions (org_id, ts);

CREATE TABLE IF NOT EXISTS rate_limit_configs (
    org_id      BIGINT PRIMARY KEY REFERENCES organizations(id),
    per_minute  BIGINT NOT NULL,
    per_hour    BIGINT NOT NULL,
    per_day     BIGINT NOT NULL,
    enabled     BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS alert_channels (
    id      BIGSERIAL PRIMARY KEY,
    org_id  BIGINT NOT NULL REFERENCES organizations(id),
    kind    TEXT NOT NULL,
    config  JSONB NOT NULL,
    active  BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS alert_configs (
    org_id          BIGINT NOT NULL REFERENCES organizations(id),
    kind            TEXT NOT NULL,
    threshold       DOUBLE PRECISION NOT NULL,
    enabled         BOOLEAN NOT NULL DEFAULT TRUE,
    last_triggered  TIMESTAMPTZ,
    PRIMARY KEY (org_id, kind)
);
"#;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and bring the schema up to date. Fatal on any failure.
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("connecting to PostgreSQL")?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .context("creating schema")?;

        info!("connected to PostgreSQL, schema ready");
        Ok(Self { pool })
    }
}

fn provider_from_row(row: &PgRow) -> anyhow::Result<ProviderConfigRow> {
    let provider_str: String = row.try_get("provider")?;
    let provider = ProviderKind::parse(&provider_str)
        .with_context(|| format!("unknown provider `{provider_str}` in provider_configs"))?;
    let sealed: Value = row.try_get("api_key_ciphertext")?;
    Ok(ProviderConfigRow {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        provider,
        sealed_key: serde_json::from_value::<SealedSecret>(sealed)
            .context("malformed sealed credential")?,
        enabled: row.try_get("enabled")?,
        priority: row.try_get("priority")?,
        created_at: row.try_get("created_at")?,
    })
}

fn cache_entry_from_row(row: &PgRow) -> anyhow::Result<CacheEntryRow> {
    Ok(CacheEntryRow {
        fingerprint: row.try_get("fingerprint")?,
        prompt_hash: row.try_get("prompt_hash")?,
        model: row.try_get("model")?,
        response: row.try_get("response")?,
        created_at: row.try_get("created_at")?,
        last_accessed: row.try_get("last_accessed")?,
        hit_count: row.try_get("hit_count")?,
        ttl_hours: row.try_get("ttl_hours")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn insert_tenant(&self, name: &str, api_key_hash: &str) -> anyhow::Result<i64> {
        let row = sqlx::query(
            "INSERT INTO organizations (name, api_key_hash) VALUES ($1, $2) RETURNING id",
        )
        .bind(name)
        .bind(api_key_hash)
        .fetch_one(&self.pool)
        .await
        .context("inserting organization")?;
        Ok(row.try_get("id")?)
    }

    async fn tenant_by_key_hash(&self, api_key_hash: &str) -> anyhow::Result<Option<TenantRow>> {
        let row = sqlx::query("SELECT id, name FROM organizations WHERE api_key_hash = $1")
            .bind(api_key_hash)
            .fetch_optional(&self.pool)
            .await
            .context("looking up organization by key hash")?;
        Ok(match row {
            Some(r) => Some(TenantRow {
                id: r.try_get("id")?,
                name: r.try_get("name")?,
            }),
            None => None,
        })
    }

    async fn list_provider_configs(&self, org_id: i64) -> anyhow::Result<Vec<ProviderConfigRow>> {
        let rows = sqlx::query(
            "SELECT id, org_id, provider, api_key_ciphertext, enabled, priority, created_at \
             FROM provider_configs WHERE org_id = $1 ORDER BY priority, id",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .context("listing provider configs")?;
        rows.iter().map(provider_from_row).collect()
    }

    async fn upsert_provider_config(
        &self,
        org_id: i64,
        provider: ProviderKind,
        sealed_key: &SealedSecret,
        enabled: bool,
        priority: i32,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO provider_configs (org_id, provider, api_key_ciphertext, enabled, priority) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (org_id, provider) DO UPDATE SET \
                 api_key_ciphertext = EXCLUDED.api_key_ciphertext, \
                 enabled = EXCLUDED.enabled, \
                 priority = EXCLUDED.priority",
        )
        .bind(org_id)
        .bind(provider.as_str())
        .bind(serde_json::to_value(sealed_key).context("serializing sealed credential")?)
        .bind(enabled)
        .bind(priority)
        .execute(&self.pool)
        .await
        .context("upserting provider config")?;
        Ok(())
    }

    async fn set_provider_state(
        &self,
        org_id: i64,
        provider: ProviderKind,
        enabled: Option<bool>,
        priority: Option<i32>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE provider_configs SET \
                 enabled = COALESCE($3, enabled), \
                 priority = COALESCE($4, priority) \
             WHERE org_id = $1 AND provider = $2",
        )
        .bind(org_id)
        .bind(provider.as_str())
        .bind(enabled)
        .bind(priority)
        .execute(&self.pool)
        .await
        .context("updating provider config")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_provider_config(
        &self,
        org_id: i64,
        provider: ProviderKind,
    ) -> anyhow::Result<bool> {
        let result =
            sqlx::query("DELETE FROM provider_configs WHERE org_id = $1 AND provider = $2")
                .bind(org_id)
                .bind(provider.as_str())
                .execute(&self.pool)
                .await
                .context("deleting provider config")?;
        Ok(result.rows_affected() > 0)
    }

    async fn rate_limit_config(
        &self,
        org_id: i64,
    ) -> anyhow::Result<Option<RateLimitConfigRow>> {
        let row = sqlx::query(
            "SELECT org_id, per_minute, per_hour, per_day, enabled \
             FROM rate_limit_configs WHERE org_id = $1",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .context("reading rate limit config")?;
        Ok(match row {
            Some(r) => Some(RateLimitConfigRow {
                org_id: r.try_get("org_id")?,
                per_minute: r.try_get("per_minute")?,
                per_hour: r.try_get("per_hour")?,
                per_day: r.try_get("per_day")?,
                enabled: r.try_get("enabled")?,
            }),
            None => None,
        })
    }

    async fn put_rate_limit_config(&self, cfg: &RateLimitConfigRow) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO rate_limit_configs (org_id, per_minute, per_hour, per_day, enabled) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (org_id) DO UPDATE SET \
                 per_minute = EXCLUDED.per_minute, \
                 per_hour = EXCLUDED.per_hour, \
                 per_day = EXCLUDED.per_day, \
                 enabled = EXCLUDED.enabled",
        )
        .bind(cfg.org_id)
        .bind(cfg.per_minute)
        .bind(cfg.per_hour)
        .bind(cfg.per_day)
        .bind(cfg.enabled)
        .execute(&self.pool)
        .await
        .context("writing rate limit config")?;
        Ok(())
    }

    async fn cache_lookup(&self, fingerprint: &str) -> anyhow::Result<Option<CacheEntryRow>> {
        let row = sqlx::query("SELECT * FROM cache_entries WHERE fingerprint = $1")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .context("durable cache lookup")?;
        row.as_ref().map(cache_entry_from_row).transpose()
    }

    async fn cache_upsert(&self, row: &CacheEntryRow) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO cache_entries \
                 (fingerprint, prompt_hash, model, response, created_at, last_accessed, hit_count, ttl_hours) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (fingerprint) DO UPDATE SET \
                 response = EXCLUDED.response, \
                 model = EXCLUDED.model, \
                 last_accessed = EXCLUDED.last_accessed, \
                 ttl_hours = EXCLUDED.ttl_hours, \
                 hit_count = GREATEST(cache_entries.hit_count, EXCLUDED.hit_count)",
        )
        .bind(&row.fingerprint)
        .bind(&row.prompt_hash)
        .bind(&row.model)
        .bind(&row.response)
        .bind(row.created_at)
        .bind(row.last_accessed)
        .bind(row.hit_count)
        .bind(row.ttl_hours)
        .execute(&self.pool)
        .await
        .context("durable cache upsert")?;
        Ok(())
    }

    async fn cache_touch(&self, fingerprint: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE cache_entries SET hit_count = hit_count + 1, last_accessed = $2 \
             WHERE fingerprint = $1",
        )
        .bind(fingerprint)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("durable cache touch")?;
        Ok(())
    }

    async fn cache_delete_like(&self, pattern: &str) -> anyhow::Result<u64> {
        let like = pattern.replace('*', "%");
        let result = sqlx::query("DELETE FROM cache_entries WHERE fingerprint LIKE $1")
            .bind(like)
            .execute(&self.pool)
            .await
            .context("durable cache pattern delete")?;
        Ok(result.rows_affected())
    }

    async fn cache_clear(&self) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await
            .context("durable cache clear")?;
        Ok(result.rows_affected())
    }

    async fn cache_stats(&self) -> anyhow::Result<DurableCacheStats> {
        let row = sqlx::query(
            "SELECT count(*)::bigint AS entries, \
                    coalesce(sum(length(response::text)), 0)::bigint AS approx_bytes \
             FROM cache_entries",
        )
        .fetch_one(&self.pool)
        .await
        .context("durable cache stats")?;
        Ok(DurableCacheStats {
            entries: row.try_get("entries")?,
            approx_bytes: row.try_get("approx_bytes")?,
        })
    }

    async fn insert_ledger_rows(&self, rows: &[LedgerRow]) -> anyhow::Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut builder = QueryBuilder::new(
            "INSERT INTO ledger \
                 (id, org_id, ts, requested_model, provider, model, prompt_tokens, \
                  completion_tokens, total_tokens, cost_usd, latency_ms, cache_hit, \
                  cache_key, endpoint, upstream_status, error) ",
        );
        builder.push_values(rows, |mut b, row| {
            b.push_bind(&row.id)
                .push_bind(row.org_id)
                .push_bind(row.ts)
                .push_bind(&row.requested_model)
                .push_bind(&row.provider)
                .push_bind(&row.model)
                .push_bind(row.prompt_tokens)
                .push_bind(row.completion_tokens)
                .push_bind(row.total_tokens)
                .push_bind(row.cost_usd)
                .push_bind(row.latency_ms)
                .push_bind(row.cache_hit)
                .push_bind(&row.cache_key)
                .push_bind(&row.endpoint)
                .push_bind(row.upstream_status)
                .push_bind(&row.error);
        });
        builder
            .build()
            .execute(&self.pool)
            .await
            .context("batch-inserting ledger rows")?;
        Ok(())
    }

    async fn insert_routing_decision(&self, row: &RoutingDecisionRow) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO routing_decisions \
                 (id, org_id, ts, requested_model, selected_model, task_class, reason, \
                  estimated_savings, confidence, prompt_chars) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&row.id)
        .bind(row.org_id)
        .bind(row.ts)
        .bind(&row.requested_model)
        .bind(&row.selected_model)
        .bind(&row.task_class)
        .bind(&row.reason)
        .bind(row.estimated_savings)
        .bind(row.confidence)
        .bind(row.prompt_chars)
        .execute(&self.pool)
        .await
        .context("inserting routing decision")?;
        Ok(())
    }

    async fn cost_between(
        &self,
        org_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<f64> {
        let row = sqlx::query(
            "SELECT coalesce(sum(cost_usd), 0)::float8 AS total FROM ledger \
             WHERE org_id = $1 AND ts >= $2 AND ts < $3",
        )
        .bind(org_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .context("aggregating ledger cost")?;
        Ok(row.try_get("total")?)
    }

    async fn usage_between(
        &self,
        org_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        group_by: UsageGroupBy,
    ) -> anyhow::Result<Vec<UsageBucket>> {
        let key_expr = match group_by {
            UsageGroupBy::Day => "to_char(date_trunc('day', ts), 'YYYY-MM-DD')",
            UsageGroupBy::Model => "coalesce(model, '(none)')",
            UsageGroupBy::Provider => "coalesce(provider, '(none)')",
        };
        let sql = format!(
            "SELECT {key_expr} AS key, \
                    count(*)::bigint AS requests, \
                    coalesce(sum(cost_usd), 0)::float8 AS cost_usd, \
                    coalesce(sum(total_tokens), 0)::bigint AS total_tokens, \
                    (count(*) FILTER (WHERE cache_hit))::bigint AS cache_hits \
             FROM ledger WHERE org_id = $1 AND ts >= $2 AND ts < $3 \
             GROUP BY 1 ORDER BY 1"
        );
        let rows = sqlx::query(&sql)
            .bind(org_id)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .context("aggregating usage")?;
        rows.iter()
            .map(|r| {
                Ok(UsageBucket {
                    key: r.try_get("key")?,
                    requests: r.try_get("requests")?,
                    cost_usd: r.try_get("cost_usd")?,
                    total_tokens: r.try_get("total_tokens")?,
                    cache_hits: r.try_get("cache_hits")?,
                })
            })
            .collect()
    }

    async fn request_stats_between(
        &self,
        org_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<(i64, i64)> {
        let row = sqlx::query(
            "SELECT count(*)::bigint AS total, \
                    (count(*) FILTER (WHERE cache_hit))::bigint AS hits \
             FROM ledger WHERE org_id = $1 AND ts >= $2 AND ts < $3",
        )
        .bind(org_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .context("counting requests")?;
        Ok((row.try_get("total")?, row.try_get("hits")?))
    }

    async fn routing_summary(
        &self,
        org_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<RoutingSummary>> {
        let rows = sqlx::query(
            "SELECT requested_model, selected_model, task_class, \
                    count(*)::bigint AS requests, \
                    coalesce(sum(estimated_savings), 0)::float8 AS estimated_savings \
             FROM routing_decisions WHERE org_id = $1 AND ts >= $2 AND ts < $3 \
             GROUP BY 1, 2, 3 ORDER BY estimated_savings DESC",
        )
        .bind(org_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("summarizing routing decisions")?;
        rows.iter()
            .map(|r| {
                Ok(RoutingSummary {
                    requested_model: r.try_get("requested_model")?,
                    selected_model: r.try_get("selected_model")?,
                    task_class: r.try_get("task_class")?,
                    requests: r.try_get("requests")?,
                    estimated_savings: r.try_get("estimated_savings")?,
                })
            })
            .collect()
    }

    async fn orgs_with_enabled_alerts(&self) -> anyhow::Result<Vec<(i64, String)>> {
        let rows = sqlx::query(
            "SELECT DISTINCT o.id, o.name FROM organizations o \
             JOIN alert_configs a ON a.org_id = o.id WHERE a.enabled ORDER BY o.id",
        )
        .fetch_all(&self.pool)
        .await
        .context("listing organizations with alerts")?;
        rows.iter()
            .map(|r| Ok((r.try_get("id")?, r.try_get("name")?)))
            .collect()
    }

    async fn alert_configs(&self, org_id: i64) -> anyhow::Result<Vec<AlertConfigRow>> {
        let rows = sqlx::query(
            "SELECT org_id, kind, threshold, enabled, last_triggered \
             FROM alert_configs WHERE org_id = $1 ORDER BY kind",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .context("listing alert configs")?;
        rows.iter()
            .map(|r| {
                let kind_str: String = r.try_get("kind")?;
                let kind = AlertKind::parse(&kind_str)
                    .with_context(|| format!("unknown alert kind `{kind_str}`"))?;
                Ok(AlertConfigRow {
                    org_id: r.try_get("org_id")?,
                    kind,
                    threshold: r.try_get("threshold")?,
                    enabled: r.try_get("enabled")?,
                    last_triggered: r.try_get("last_triggered")?,
                })
            })
            .collect()
    }

    async fn upsert_alert_config(&self, cfg: &AlertConfigRow) -> anyhow::Result<()> {
        // last_triggered is intentionally left alone on update — editing a
        // threshold must not re-arm the current window.
        sqlx::query(
            "INSERT INTO alert_configs (org_id, kind, threshold, enabled) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (org_id, kind) DO UPDATE SET \
                 threshold = EXCLUDED.threshold, \
                 enabled = EXCLUDED.enabled",
        )
        .bind(cfg.org_id)
        .bind(cfg.kind.as_str())
        .bind(cfg.threshold)
        .bind(cfg.enabled)
        .execute(&self.pool)
        .await
        .context("upserting alert config")?;
        Ok(())
    }

    async fn stamp_alert_triggered(
        &self,
        org_id: i64,
        kind: AlertKind,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE alert_configs SET last_triggered = $3 WHERE org_id = $1 AND kind = $2",
        )
        .bind(org_id)
        .bind(kind.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .context("stamping alert trigger")?;
        Ok(())
    }

    async fn alert_channels(&self, org_id: i64) -> anyhow::Result<Vec<AlertChannelRow>> {
        let rows = sqlx::query(
            "SELECT id, org_id, kind, config, active FROM alert_channels \
             WHERE org_id = $1 ORDER BY id",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .context("listing alert channels")?;
        rows.iter()
            .map(|r| {
                let kind_str: String = r.try_get("kind")?;
                let kind = ChannelKind::parse(&kind_str)
                    .with_context(|| format!("unknown channel kind `{kind_str}`"))?;
                Ok(AlertChannelRow {
                    id: r.try_get("id")?,
                    org_id: r.try_get("org_id")?,
                    kind,
                    config: r.try_get("config")?,
                    active: r.try_get("active")?,
                })
            })
            .collect()
    }

    async fn insert_alert_channel(
        &self,
        org_id: i64,
        kind: ChannelKind,
        config: &Value,
        active: bool,
    ) -> anyhow::Result<i64> {
        let row = sqlx::query(
            "INSERT INTO alert_channels (org_id, kind, config, active) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(org_id)
        .bind(kind.as_str())
        .bind(config)
        .bind(active)
        .fetch_one(&self.pool)
        .await
        .context("inserting alert channel")?;
        Ok(row.try_get("id")?)
    }

    async fn delete_alert_channel(&self, org_id: i64, channel_id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM alert_channels WHERE org_id = $1 AND id = $2")
            .bind(org_id)
            .bind(channel_id)
            .execute(&self.pool)
            .await
            .context("deleting alert channel")?;
        Ok(result.rows_affected() > 0)
    }
}
