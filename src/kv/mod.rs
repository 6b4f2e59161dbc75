//! Key-value store seam — the fast cache tier and rate-limit counters.
//!
//! The pipeline only needs a handful of operations: atomic integer counters
//! with expiry, float accumulators, TTL'd string values, and glob-pattern
//! deletion. [`KvStore`] captures exactly that surface; production uses the
//! Redis implementation, tests and single-instance deployments use the
//! in-memory one.

mod memory;
mod redis_store;

pub use memory::MemoryKv;
pub use redis_store::RedisKv;

use std::time::Duration;

use async_trait::async_trait;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically increment an integer counter by one, returning the new
    /// value. When the key is created by this call its expiry is set to
    /// `ttl`; an existing key keeps its original expiry.
    async fn incr(&self, key: &str, ttl: Duration) -> anyhow::Result<i64>;

    /// Read an integer counter; missing or expired keys read as zero.
    async fn read_count(&self, key: &str) -> anyhow::Result<i64>;

    /// Atomically add to a float accumulator, returning the new value.
    /// Float accumulators never expire.
    async fn incr_f64(&self, key: &str, by: f64) -> anyhow::Result<f64>;

    /// Read a float accumulator; missing keys read as zero.
    async fn read_f64(&self, key: &str) -> anyhow::Result<f64>;

    /// Read a string value, honouring expiry.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Write a string value with the given TTL, replacing any previous
    /// value and expiry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;

    /// Delete every key matching a glob pattern (`*` wildcards only).
    /// Returns the number of keys removed.
    async fn delete_pattern(&self, pattern: &str) -> anyhow::Result<u64>;
}

/// Anchored glob match supporting `*` wildcards — the subset of Redis
/// `KEYS`/`SCAN` patterns the gateway uses.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    // Pattern ended with `*` (or was all wildcards).
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_match_exact() {
        assert!(glob_match("cache:fast:abc", "cache:fast:abc"));
        assert!(!glob_match("cache:fast:abc", "cache:fast:abd"));
    }

    #[test]
    fn glob_match_prefix_wildcard() {
        assert!(glob_match("cache:fast:*", "cache:fast:abc"));
        assert!(glob_match("cache:fast:*", "cache:fast:"));
        assert!(!glob_match("cache:fast:*", "rl:42:60"));
    }

    #[test]
    fn glob_match_infix_wildcard() {
        assert!(glob_match("rl:*:60:*", "rl:7:60:1700000000"));
        assert!(!glob_match("rl:*:60:*", "rl:7:3600:1700000000"));
    }

    #[test]
    fn glob_match_star_matches_everything() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("*", ""));
    }
}
