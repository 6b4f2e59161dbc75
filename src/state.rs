//! Shared application state injected into every request handler and
//! background task via `axum::extract::State`.

use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};

use crate::cache::TwoTierCache;
use crate::config::Config;
use crate::kv::KvStore;
use crate::ledger::LedgerHandle;
use crate::limiter::SlidingWindowLimiter;
use crate::metrics::Metrics;
use crate::registry::ProviderRegistry;
use crate::storage::Store;

/// The authenticated tenant, resolved by the auth middleware and attached
/// to the request as an extension.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub org_id: i64,
    pub name: String,
}

pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub kv: Arc<dyn KvStore>,
    pub cache: Arc<TwoTierCache>,
    pub registry: ProviderRegistry,
    pub limiter: SlidingWindowLimiter,
    pub ledger: LedgerHandle,
    pub metrics: Arc<Metrics>,
    /// Salt mixed into tenant API-key hashes; resolved once at startup.
    pub api_key_salt: String,
    pub started_at: Instant,
    /// Bearer token guarding the ops port, when configured.
    pub ops_token: Option<String>,
}

impl AppState {
    /// Salted SHA-256 of a tenant API key, hex-encoded — the only form of
    /// the key the gateway ever stores or compares.
    pub fn hash_api_key(&self, api_key: &str) -> String {
        hash_api_key(&self.api_key_salt, api_key)
    }
}

pub fn hash_api_key(salt: &str, api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update([0x1F]);
    hasher.update(api_key.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic_and_salted() {
        let a = hash_api_key("salt-1", "sk-key");
        assert_eq!(a, hash_api_key("salt-1", "sk-key"));
        assert_ne!(a, hash_api_key("salt-2", "sk-key"));
        assert_ne!(a, hash_api_key("salt-1", "sk-other"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn salt_and_key_cannot_collide_across_the_boundary() {
        // ("ab", "c") and ("a", "bc") must hash differently.
        assert_ne!(hash_api_key("ab", "c"), hash_api_key("a", "bc"));
    }
}
