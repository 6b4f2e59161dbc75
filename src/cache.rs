//! Two-tier response cache with per-fingerprint single-flight.
//!
//! The fast tier is a TTL'd copy in the KV store (`cache:fast:{fp}`); the
//! durable tier is a relational row and is authoritative. Lookups read fast
//! → durable → miss, promoting durable hits back into the fast tier. Tier
//! errors never fail a request: the lookup falls through to the next tier
//! and bumps the degradation counter.
//!
//! Single-flight guarantees at-most-one concurrent upstream call per
//! fingerprint within this process: the first miss becomes the leader,
//! later arrivals wait on the same lock and re-read the cache once the
//! leader releases it. A waiter that finds the cache still empty is
//! promoted to leader, which covers leader failure without any extra
//! signalling.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::kv::KvStore;
use crate::metrics::Metrics;
use crate::storage::{CacheEntryRow, Store};

const FAST_PREFIX: &str = "cache:fast:";
const SAVED_KEY: &str = "cache:lifetime_saved_usd";

/// How long a follower waits for the leader before giving up and calling
/// upstream itself.
const FLIGHT_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub fast_hits: u64,
    pub fast_misses: u64,
    pub durable_entries: i64,
    pub approx_memory_bytes: i64,
    pub lifetime_cost_saved: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    Fast,
    Durable,
    All,
}

impl ClearScope {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fast" => Some(Self::Fast),
            "durable" => Some(Self::Durable),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

/// Outcome of joining the single-flight group for a fingerprint.
pub enum Flight {
    /// This task must perform the upstream call; the guard releases the
    /// flight (and wakes followers) on drop.
    Leader(FlightGuard),
    /// A leader already populated the cache while we waited.
    Hit(CacheEntryRow),
    /// The leader outlived the wait deadline; proceed without the
    /// at-most-one guarantee.
    TimedOut,
}

pub struct FlightGuard {
    fingerprint: String,
    flights: Arc<DashMap<String, Arc<Mutex<()>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        // Remove the map entry before the lock releases; stragglers holding
        // the old Arc still serialize among themselves, new arrivals start
        // a fresh flight and find the cache populated.
        self.flights.remove(&self.fingerprint);
    }
}

pub struct TwoTierCache {
    kv: Arc<dyn KvStore>,
    store: Arc<dyn Store>,
    metrics: Arc<Metrics>,
    ttl_hours: i64,
    flight_wait: Duration,
    flights: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl TwoTierCache {
    pub fn new(
        kv: Arc<dyn KvStore>,
        store: Arc<dyn Store>,
        metrics: Arc<Metrics>,
        ttl_hours: i64,
    ) -> Self {
        Self {
            kv,
            store,
            metrics,
            ttl_hours,
            flight_wait: FLIGHT_WAIT,
            flights: Arc::new(DashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn with_flight_wait(mut self, wait: Duration) -> Self {
        self.flight_wait = wait;
        self
    }

    /// Fast tier, then durable tier, then miss. Tier errors degrade
    /// silently.
    pub async fn get(&self, fingerprint: &str) -> Option<CacheEntryRow> {
        let fast_key = format!("{FAST_PREFIX}{fingerprint}");
        match self.kv.get(&fast_key).await {
            Ok(Some(json)) => match serde_json::from_str::<CacheEntryRow>(&json) {
                Ok(row) => {
                    Metrics::incr(&self.metrics.cache_fast_hits);
                    return Some(row);
                }
                Err(e) => {
                    warn!(fingerprint, error = %e, "corrupt fast-tier entry — ignoring");
                    Metrics::incr(&self.metrics.cache_degraded);
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(fingerprint, error = %e, "fast tier read failed — falling through");
                Metrics::incr(&self.metrics.cache_degraded);
            }
        }
        Metrics::incr(&self.metrics.cache_fast_misses);

        match self.store.cache_lookup(fingerprint).await {
            Ok(Some(row)) => {
                Metrics::incr(&self.metrics.cache_durable_hits);
                self.write_fast(&row).await;
                Some(row)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(fingerprint, error = %e, "durable tier read failed — treating as miss");
                Metrics::incr(&self.metrics.cache_degraded);
                None
            }
        }
    }

    /// Store a completed response in both tiers. Idempotent: re-putting the
    /// same fingerprint rewrites the payload but never lowers the hit
    /// counter.
    pub async fn put(
        &self,
        fingerprint: &str,
        prompt_hash: &str,
        model: &str,
        response: &Value,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let row = CacheEntryRow {
            fingerprint: fingerprint.to_string(),
            prompt_hash: prompt_hash.to_string(),
            model: model.to_string(),
            response: response.clone(),
            created_at: now,
            last_accessed: now,
            hit_count: 0,
            ttl_hours: self.ttl_hours,
        };
        self.store.cache_upsert(&row).await?;
        self.write_fast(&row).await;
        Ok(())
    }

    /// Record a hit: bump the durable counter, refresh the fast-tier TTL,
    /// and accumulate the cost the hit avoided. Best-effort throughout.
    pub async fn touch(&self, row: &CacheEntryRow, saved_usd: f64) {
        let now = Utc::now();
        if let Err(e) = self.store.cache_touch(&row.fingerprint, now).await {
            warn!(fingerprint = %row.fingerprint, error = %e, "cache touch failed");
            Metrics::incr(&self.metrics.cache_degraded);
        }

        let mut refreshed = row.clone();
        refreshed.hit_count += 1;
        refreshed.last_accessed = now;
        self.write_fast(&refreshed).await;

        if saved_usd > 0.0 {
            if let Err(e) = self.kv.incr_f64(SAVED_KEY, saved_usd).await {
                debug!(error = %e, "could not accumulate lifetime savings");
            }
        }
    }

    /// Drop entries matching a fingerprint glob from both tiers.
    pub async fn invalidate(&self, pattern: &str) -> anyhow::Result<u64> {
        self.kv
            .delete_pattern(&format!("{FAST_PREFIX}{pattern}"))
            .await?;
        self.store.cache_delete_like(pattern).await
    }

    pub async fn clear(&self, scope: ClearScope) -> anyhow::Result<u64> {
        let mut removed = 0;
        if matches!(scope, ClearScope::Fast | ClearScope::All) {
            removed += self.kv.delete_pattern(&format!("{FAST_PREFIX}*")).await?;
        }
        if matches!(scope, ClearScope::Durable | ClearScope::All) {
            removed += self.store.cache_clear().await?;
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> anyhow::Result<CacheStats> {
        let durable = self.store.cache_stats().await?;
        let saved = self.kv.read_f64(SAVED_KEY).await.unwrap_or(0.0);
        Ok(CacheStats {
            fast_hits: Metrics::get(&self.metrics.cache_fast_hits),
            fast_misses: Metrics::get(&self.metrics.cache_fast_misses),
            durable_entries: durable.entries,
            approx_memory_bytes: durable.approx_bytes,
            lifetime_cost_saved: crate::pricing::round6(saved),
        })
    }

    /// Join the single-flight group for a fingerprint after a cache miss.
    pub async fn join_flight(&self, fingerprint: &str) -> Flight {
        let lock = self
            .flights
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        if let Ok(guard) = lock.clone().try_lock_owned() {
            return Flight::Leader(FlightGuard {
                fingerprint: fingerprint.to_string(),
                flights: Arc::clone(&self.flights),
                _guard: guard,
            });
        }

        match tokio::time::timeout(self.flight_wait, lock.lock_owned()).await {
            Ok(guard) => {
                // The leader finished (or failed). If it populated the
                // cache we are done; otherwise this waiter is promoted.
                match self.get(fingerprint).await {
                    Some(row) => Flight::Hit(row),
                    None => Flight::Leader(FlightGuard {
                        fingerprint: fingerprint.to_string(),
                        flights: Arc::clone(&self.flights),
                        _guard: guard,
                    }),
                }
            }
            Err(_) => {
                warn!(fingerprint, "single-flight wait expired — proceeding without it");
                Metrics::incr(&self.metrics.cache_degraded);
                Flight::TimedOut
            }
        }
    }

    async fn write_fast(&self, row: &CacheEntryRow) {
        let key = format!("{FAST_PREFIX}{}", row.fingerprint);
        let ttl = Duration::from_secs((row.ttl_hours.max(1) as u64) * 3600);
        match serde_json::to_string(row) {
            Ok(json) => {
                if let Err(e) = self.kv.set(&key, &json, ttl).await {
                    warn!(fingerprint = %row.fingerprint, error = %e, "fast tier write failed");
                    Metrics::incr(&self.metrics.cache_degraded);
                }
            }
            Err(e) => warn!(error = %e, "cache entry serialization failed"),
        }
    }
}
