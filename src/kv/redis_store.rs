//! Redis-backed [`KvStore`].
//!
//! Uses a [`ConnectionManager`] — cheap to clone, reconnects on its own —
//! shared by the limiter and the fast cache tier. All keys are namespaced
//! by the callers (`rl:…`, `cache:fast:…`), so the same database can be
//! shared with other gateway instances; that sharing is what makes the
//! sliding-window counters fleet-wide.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};

use super::KvStore;

pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    /// Open a connection manager against a `redis://` URL and verify the
    /// server responds before the gateway starts taking traffic.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("parsing Redis URL")?;
        let mut conn = ConnectionManager::new(client)
            .await
            .context("connecting to Redis")?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .context("Redis PING failed")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn incr(&self, key: &str, ttl: Duration) -> anyhow::Result<i64> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.incr(key, 1).await.context("INCR")?;
        if count == 1 {
            // First writer sets the expiry; later increments keep it.
            let _: bool = conn
                .expire(key, ttl.as_secs() as i64)
                .await
                .context("EXPIRE")?;
        }
        Ok(count)
    }

    async fn read_count(&self, key: &str) -> anyhow::Result<i64> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await.context("GET")?;
        Ok(value.unwrap_or(0))
    }

    async fn incr_f64(&self, key: &str, by: f64) -> anyhow::Result<f64> {
        let mut conn = self.conn.clone();
        let value: f64 = conn.incr(key, by).await.context("INCRBYFLOAT")?;
        Ok(value)
    }

    async fn read_f64(&self, key: &str) -> anyhow::Result<f64> {
        let mut conn = self.conn.clone();
        let value: Option<f64> = conn.get(key).await.context("GET")?;
        Ok(value.unwrap_or(0.0))
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.context("GET")
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, value, ttl.as_secs())
            .await
            .context("SETEX")?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> anyhow::Result<u64> {
        // SCAN, then DEL in one batch — never KEYS, which blocks the server.
        let keys: Vec<String> = {
            let mut conn = self.conn.clone();
            let mut iter = conn
                .scan_match::<_, String>(pattern)
                .await
                .context("SCAN")?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(&keys).await.context("DEL")?;
        Ok(removed as u64)
    }
}
