//! In-memory [`Store`] used by tests.
//!
//! Semantics mirror the Postgres implementation closely enough for the
//! pipeline, scheduler, and management tests to run without a database:
//! upserts respect the same unique keys, the cache hit counter never
//! decreases, and aggregates use the same half-open `[start, end)` windows.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::kv::glob_match;
use crate::models::ProviderKind;
use crate::secrets::SealedSecret;

use super::{
    AlertChannelRow, AlertConfigRow, AlertKind, CacheEntryRow, ChannelKind, DurableCacheStats,
    LedgerRow, ProviderConfigRow, RateLimitConfigRow, RoutingDecisionRow, RoutingSummary, Store,
    TenantRow, UsageBucket, UsageGroupBy,
};

#[derive(Default)]
struct Inner {
    next_id: i64,
    tenants: Vec<(TenantRow, String)>,
    providers: Vec<ProviderConfigRow>,
    rate_limits: HashMap<i64, RateLimitConfigRow>,
    cache: HashMap<String, CacheEntryRow>,
    ledger: Vec<LedgerRow>,
    routing: Vec<RoutingDecisionRow>,
    alert_configs: Vec<AlertConfigRow>,
    alert_channels: Vec<AlertChannelRow>,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger rows written so far — test assertion helper.
    pub fn ledger_len(&self) -> usize {
        self.inner.lock().unwrap().ledger.len()
    }

    pub fn ledger_rows(&self) -> Vec<LedgerRow> {
        self.inner.lock().unwrap().ledger.clone()
    }

    pub fn routing_rows(&self) -> Vec<RoutingDecisionRow> {
        self.inner.lock().unwrap().routing.clone()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn insert_tenant(&self, name: &str, api_key_hash: &str) -> anyhow::Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.tenants.push((
            TenantRow {
                id,
                name: name.to_string(),
            },
            api_key_hash.to_string(),
        ));
        Ok(id)
    }

    async fn tenant_by_key_hash(&self, api_key_hash: &str) -> anyhow::Result<Option<TenantRow>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tenants
            .iter()
            .find(|(_, hash)| hash == api_key_hash)
            .map(|(t, _)| t.clone()))
    }

    async fn list_provider_configs(&self, org_id: i64) -> anyhow::Result<Vec<ProviderConfigRow>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<_> = inner
            .providers
            .iter()
            .filter(|p| p.org_id == org_id)
            .cloned()
            .collect();
        rows.sort_by_key(|p| (p.priority, p.id));
        Ok(rows)
    }

    async fn upsert_provider_config(
        &self,
        org_id: i64,
        provider: ProviderKind,
        sealed_key: &SealedSecret,
        enabled: bool,
        priority: i32,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner
            .providers
            .iter_mut()
            .find(|p| p.org_id == org_id && p.provider == provider)
        {
            existing.sealed_key = sealed_key.clone();
            existing.enabled = enabled;
            existing.priority = priority;
            return Ok(());
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.providers.push(ProviderConfigRow {
            id,
            org_id,
            provider,
            sealed_key: sealed_key.clone(),
            enabled,
            priority,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn set_provider_state(
        &self,
        org_id: i64,
        provider: ProviderKind,
        enabled: Option<bool>,
        priority: Option<i32>,
    ) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner
            .providers
            .iter_mut()
            .find(|p| p.org_id == org_id && p.provider == provider)
        {
            Some(p) => {
                if let Some(enabled) = enabled {
                    p.enabled = enabled;
                }
                if let Some(priority) = priority {
                    p.priority = priority;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_provider_config(
        &self,
        org_id: i64,
        provider: ProviderKind,
    ) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.providers.len();
        inner
            .providers
            .retain(|p| !(p.org_id == org_id && p.provider == provider));
        Ok(inner.providers.len() < before)
    }

    async fn rate_limit_config(
        &self,
        org_id: i64,
    ) -> anyhow::Result<Option<RateLimitConfigRow>> {
        Ok(self.inner.lock().unwrap().rate_limits.get(&org_id).cloned())
    }

    async fn put_rate_limit_config(&self, cfg: &RateLimitConfigRow) -> anyhow::Result<()> {
        self.inner
            .lock()
            .unwrap()
            .rate_limits
            .insert(cfg.org_id, cfg.clone());
        Ok(())
    }

    async fn cache_lookup(&self, fingerprint: &str) -> anyhow::Result<Option<CacheEntryRow>> {
        Ok(self.inner.lock().unwrap().cache.get(fingerprint).cloned())
    }

    async fn cache_upsert(&self, row: &CacheEntryRow) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.cache.get_mut(&row.fingerprint) {
            Some(existing) => {
                existing.response = row.response.clone();
                existing.model = row.model.clone();
                existing.last_accessed = row.last_accessed;
                existing.ttl_hours = row.ttl_hours;
                existing.hit_count = existing.hit_count.max(row.hit_count);
            }
            None => {
                inner.cache.insert(row.fingerprint.clone(), row.clone());
            }
        }
        Ok(())
    }

    async fn cache_touch(&self, fingerprint: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(entry) = self.inner.lock().unwrap().cache.get_mut(fingerprint) {
            entry.hit_count += 1;
            entry.last_accessed = now;
        }
        Ok(())
    }

    async fn cache_delete_like(&self, pattern: &str) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.cache.len();
        inner.cache.retain(|fp, _| !glob_match(pattern, fp));
        Ok((before - inner.cache.len()) as u64)
    }

    async fn cache_clear(&self) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let n = inner.cache.len() as u64;
        inner.cache.clear();
        Ok(n)
    }

    async fn cache_stats(&self) -> anyhow::Result<DurableCacheStats> {
        let inner = self.inner.lock().unwrap();
        let approx_bytes: i64 = inner
            .cache
            .values()
            .map(|e| e.response.to_string().len() as i64)
            .sum();
        Ok(DurableCacheStats {
            entries: inner.cache.len() as i64,
            approx_bytes,
        })
    }

    async fn insert_ledger_rows(&self, rows: &[LedgerRow]) -> anyhow::Result<()> {
        self.inner.lock().unwrap().ledger.extend_from_slice(rows);
        Ok(())
    }

    async fn insert_routing_decision(&self, row: &RoutingDecisionRow) -> anyhow::Result<()> {
        self.inner.lock().unwrap().routing.push(row.clone());
        Ok(())
    }

    async fn cost_between(
        &self,
        org_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<f64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .ledger
            .iter()
            .filter(|r| r.org_id == org_id && r.ts >= start && r.ts < end)
            .map(|r| r.cost_usd)
            .sum())
    }

    async fn usage_between(
        &self,
        org_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        group_by: UsageGroupBy,
    ) -> anyhow::Result<Vec<UsageBucket>> {
        let inner = self.inner.lock().unwrap();
        let mut buckets: HashMap<String, UsageBucket> = HashMap::new();
        for row in inner
            .ledger
            .iter()
            .filter(|r| r.org_id == org_id && r.ts >= start && r.ts < end)
        {
            let key = match group_by {
                UsageGroupBy::Day => row.ts.format("%Y-%m-%d").to_string(),
                UsageGroupBy::Model => row.model.clone().unwrap_or_else(|| "(none)".into()),
                UsageGroupBy::Provider => {
                    row.provider.clone().unwrap_or_else(|| "(none)".into())
                }
            };
            let bucket = buckets.entry(key.clone()).or_insert(UsageBucket {
                key,
                requests: 0,
                cost_usd: 0.0,
                total_tokens: 0,
                cache_hits: 0,
            });
            bucket.requests += 1;
            bucket.cost_usd += row.cost_usd;
            bucket.total_tokens += row.total_tokens;
            if row.cache_hit {
                bucket.cache_hits += 1;
            }
        }
        let mut out: Vec<_> = buckets.into_values().collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    async fn request_stats_between(
        &self,
        org_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<(i64, i64)> {
        let inner = self.inner.lock().unwrap();
        let mut total = 0;
        let mut hits = 0;
        for row in inner
            .ledger
            .iter()
            .filter(|r| r.org_id == org_id && r.ts >= start && r.ts < end)
        {
            total += 1;
            if row.cache_hit {
                hits += 1;
            }
        }
        Ok((total, hits))
    }

    async fn routing_summary(
        &self,
        org_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<RoutingSummary>> {
        let inner = self.inner.lock().unwrap();
        let mut groups: HashMap<(String, String, String), RoutingSummary> = HashMap::new();
        for row in inner
            .routing
            .iter()
            .filter(|r| r.org_id == org_id && r.ts >= start && r.ts < end)
        {
            let key = (
                row.requested_model.clone(),
                row.selected_model.clone(),
                row.task_class.clone(),
            );
            let entry = groups.entry(key).or_insert(RoutingSummary {
                requested_model: row.requested_model.clone(),
                selected_model: row.selected_model.clone(),
                task_class: row.task_class.clone(),
                requests: 0,
                estimated_savings: 0.0,
            });
            entry.requests += 1;
            entry.estimated_savings += row.estimated_savings;
        }
        let mut out: Vec<_> = groups.into_values().collect();
        out.sort_by(|a, b| {
            b.estimated_savings
                .partial_cmp(&a.estimated_savings)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(out)
    }

    async fn orgs_with_enabled_alerts(&self) -> anyhow::Result<Vec<(i64, String)>> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<(i64, String)> = Vec::new();
        for cfg in inner.alert_configs.iter().filter(|c| c.enabled) {
            if out.iter().any(|(id, _)| *id == cfg.org_id) {
                continue;
            }
            if let Some((tenant, _)) = inner.tenants.iter().find(|(t, _)| t.id == cfg.org_id) {
                out.push((tenant.id, tenant.name.clone()));
            }
        }
        out.sort_by_key(|(id, _)| *id);
        Ok(out)
    }

    async fn alert_configs(&self, org_id: i64) -> anyhow::Result<Vec<AlertConfigRow>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .alert_configs
            .iter()
            .filter(|c| c.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn upsert_alert_config(&self, cfg: &AlertConfigRow) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner
            .alert_configs
            .iter_mut()
            .find(|c| c.org_id == cfg.org_id && c.kind == cfg.kind)
        {
            Some(existing) => {
                existing.threshold = cfg.threshold;
                existing.enabled = cfg.enabled;
            }
            None => inner.alert_configs.push(cfg.clone()),
        }
        Ok(())
    }

    async fn stamp_alert_triggered(
        &self,
        org_id: i64,
        kind: AlertKind,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(cfg) = inner
            .alert_configs
            .iter_mut()
            .find(|c| c.org_id == org_id && c.kind == kind)
        {
            cfg.last_triggered = Some(at);
        }
        Ok(())
    }

    async fn alert_channels(&self, org_id: i64) -> anyhow::Result<Vec<AlertChannelRow>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .alert_channels
            .iter()
            .filter(|c| c.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn insert_alert_channel(
        &self,
        org_id: i64,
        kind: ChannelKind,
        config: &Value,
        active: bool,
    ) -> anyhow::Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.alert_channels.push(AlertChannelRow {
            id,
            org_id,
            kind,
            config: config.clone(),
            active,
        });
        Ok(id)
    }

    async fn delete_alert_channel(&self, org_id: i64, channel_id: i64) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.alert_channels.len();
        inner
            .alert_channels
            .retain(|c| !(c.org_id == org_id && c.id == channel_id));
        Ok(inner.alert_channels.len() < before)
    }
}
