//! In-process [`KvStore`] backed by a concurrent hashmap.
//!
//! Used by tests and as the single-instance fallback when no Redis URL is
//! configured. Expiry is lazy: entries are checked on read and replaced on
//! write; nothing sweeps in the background, which is fine for the bounded
//! key population the gateway creates (rate buckets + fast cache entries).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{glob_match, KvStore};

#[derive(Debug, Clone)]
enum Slot {
    Count(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

#[derive(Default)]
pub struct MemoryKv {
    entries: DashMap<String, Entry>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn incr(&self, key: &str, ttl: Duration) -> anyhow::Result<i64> {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::Count(0),
            expires_at: Some(Instant::now() + ttl),
        });
        if !entry.live() {
            *entry = Entry {
                slot: Slot::Count(0),
                expires_at: Some(Instant::now() + ttl),
            };
        }
        match &mut entry.slot {
            Slot::Count(n) => {
                *n += 1;
                Ok(*n)
            }
            _ => anyhow::bail!("key `{key}` holds a non-counter value"),
        }
    }

    async fn read_count(&self, key: &str) -> anyhow::Result<i64> {
        match self.entries.get(key) {
            Some(entry) if entry.live() => match &entry.slot {
                Slot::Count(n) => Ok(*n),
                _ => anyhow::bail!("key `{key}` holds a non-counter value"),
            },
            _ => Ok(0),
        }
    }

    async fn incr_f64(&self, key: &str, by: f64) -> anyhow::Result<f64> {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::Float(0.0),
            expires_at: None,
        });
        match &mut entry.slot {
            Slot::Float(v) => {
                *v += by;
                Ok(*v)
            }
            _ => anyhow::bail!("key `{key}` holds a non-float value"),
        }
    }

    async fn read_f64(&self, key: &str) -> anyhow::Result<f64> {
        match self.entries.get(key) {
            Some(entry) if entry.live() => match &entry.slot {
                Slot::Float(v) => Ok(*v),
                _ => anyhow::bail!("key `{key}` holds a non-float value"),
            },
            _ => Ok(0.0),
        }
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        match self.entries.get(key) {
            Some(entry) if entry.live() => match &entry.slot {
                Slot::Text(s) => Ok(Some(s.clone())),
                _ => anyhow::bail!("key `{key}` holds a non-text value"),
            },
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> anyhow::Result<u64> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
