//! Per-tenant provider registry.
//!
//! Owns the (tenant, provider) credential rows and is the only place where
//! provider keys are decrypted. Resolution returns an ordered failover
//! list: the preferred kind first when enabled, then the remaining enabled
//! entries by ascending priority, then id. Disabled rows and rows whose
//! ciphertext no longer opens are skipped — one corrupt credential must
//! not take the tenant's other providers down with it.

use std::sync::Arc;

use tracing::warn;

use crate::models::ProviderKind;
use crate::secrets::SecretBox;
use crate::storage::{ProviderConfigRow, Store};

/// A decrypted credential, alive only for the duration of a dispatch.
pub struct ProviderCredential {
    pub provider: ProviderKind,
    pub api_key: String,
    pub priority: i32,
}

pub struct ProviderRegistry {
    store: Arc<dyn Store>,
    secrets: Arc<SecretBox>,
}

impl ProviderRegistry {
    pub fn new(store: Arc<dyn Store>, secrets: Arc<SecretBox>) -> Self {
        Self { store, secrets }
    }

    /// Ordered, decrypted credentials for a dispatch.
    pub async fn resolve(
        &self,
        org_id: i64,
        preferred: Option<ProviderKind>,
    ) -> anyhow::Result<Vec<ProviderCredential>> {
        // list_provider_configs already orders by (priority, id).
        let rows = self.store.list_provider_configs(org_id).await?;
        let mut credentials = Vec::with_capacity(rows.len());

        let mut push = |row: &ProviderConfigRow, out: &mut Vec<ProviderCredential>| {
            match self.secrets.open(&row.sealed_key) {
                Ok(api_key) => out.push(ProviderCredential {
                    provider: row.provider,
                    api_key,
                    priority: row.priority,
                }),
                Err(e) => {
                    warn!(org_id, provider = %row.provider, error = %e,
                          "skipping provider — credential does not decrypt");
                }
            }
        };

        if let Some(kind) = preferred {
            if let Some(row) = rows.iter().find(|r| r.enabled && r.provider == kind) {
                push(row, &mut credentials);
            }
        }
        for row in rows.iter().filter(|r| r.enabled) {
            if Some(row.provider) == preferred {
                continue;
            }
            push(row, &mut credentials);
        }
        Ok(credentials)
    }

    /// Enabled provider kinds with priorities — the router's input. No
    /// decryption happens here.
    pub async fn enabled_kinds(&self, org_id: i64) -> anyhow::Result<Vec<(ProviderKind, i32)>> {
        Ok(self
            .store
            .list_provider_configs(org_id)
            .await?
            .into_iter()
            .filter(|r| r.enabled)
            .map(|r| (r.provider, r.priority))
            .collect())
    }

    /// Create or replace a provider config, sealing the plaintext key.
    pub async fn upsert(
        &self,
        org_id: i64,
        provider: ProviderKind,
        api_key: &str,
        enabled: bool,
        priority: i32,
    ) -> anyhow::Result<()> {
        let sealed = self.secrets.seal(api_key);
        self.store
            .upsert_provider_config(org_id, provider, &sealed, enabled, priority)
            .await
    }

    pub async fn set_state(
        &self,
        org_id: i64,
        provider: ProviderKind,
        enabled: Option<bool>,
        priority: Option<i32>,
    ) -> anyhow::Result<bool> {
        self.store
            .set_provider_state(org_id, provider, enabled, priority)
            .await
    }

    pub async fn delete(&self, org_id: i64, provider: ProviderKind) -> anyhow::Result<bool> {
        self.store.delete_provider_config(org_id, provider).await
    }

    /// Raw rows for the management API. Callers must only surface the
    /// non-secret fields; the sealed key never leaves the server.
    pub async fn list(&self, org_id: i64) -> anyhow::Result<Vec<ProviderConfigRow>> {
        self.store.list_provider_configs(org_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemStore;

    async fn registry_with(
        entries: &[(ProviderKind, &str, bool, i32)],
    ) -> (ProviderRegistry, i64) {
        let store = Arc::new(MemStore::new());
        let org_id = store.insert_tenant("acme", "hash").await.unwrap();
        let secrets = Arc::new(SecretBox::from_passphrase("test-passphrase").unwrap());
        let registry = ProviderRegistry::new(store, secrets);
        for (kind, key, enabled, priority) in entries {
            registry
                .upsert(org_id, *kind, key, *enabled, *priority)
                .await
                .unwrap();
        }
        (registry, org_id)
    }

    #[tokio::test]
    async fn resolve_orders_by_priority_and_skips_disabled() {
        let (registry, org) = registry_with(&[
            (ProviderKind::Mistral, "sk-mistral", true, 3),
            (ProviderKind::OpenAi, "sk-openai", true, 1),
            (ProviderKind::Groq, "sk-groq", false, 0),
            (ProviderKind::Anthropic, "sk-ant", true, 2),
        ])
        .await;

        let creds = registry.resolve(org, None).await.unwrap();
        let kinds: Vec<_> = creds.iter().map(|c| c.provider).collect();
        assert_eq!(
            kinds,
            vec![
                ProviderKind::OpenAi,
                ProviderKind::Anthropic,
                ProviderKind::Mistral
            ]
        );
        assert_eq!(creds[0].api_key, "sk-openai");
    }

    #[tokio::test]
    async fn resolve_puts_preferred_kind_first() {
        let (registry, org) = registry_with(&[
            (ProviderKind::OpenAi, "sk-openai", true, 1),
            (ProviderKind::Anthropic, "sk-ant", true, 2),
        ])
        .await;

        let creds = registry
            .resolve(org, Some(ProviderKind::Anthropic))
            .await
            .unwrap();
        assert_eq!(creds[0].provider, ProviderKind::Anthropic);
        assert_eq!(creds[1].provider, ProviderKind::OpenAi);
        assert_eq!(creds.len(), 2);
    }

    #[tokio::test]
    async fn disabled_preferred_kind_is_not_resurrected() {
        let (registry, org) = registry_with(&[
            (ProviderKind::OpenAi, "sk-openai", true, 1),
            (ProviderKind::Anthropic, "sk-ant", false, 2),
        ])
        .await;

        let creds = registry
            .resolve(org, Some(ProviderKind::Anthropic))
            .await
            .unwrap();
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].provider, ProviderKind::OpenAi);
    }

    #[tokio::test]
    async fn upsert_replaces_the_existing_config() {
        let (registry, org) =
            registry_with(&[(ProviderKind::OpenAi, "sk-old", true, 1)]).await;
        registry
            .upsert(org, ProviderKind::OpenAi, "sk-new", true, 5)
            .await
            .unwrap();

        let creds = registry.resolve(org, None).await.unwrap();
        assert_eq!(creds.len(), 1, "at most one config per (tenant, provider)");
        assert_eq!(creds[0].api_key, "sk-new");
        assert_eq!(creds[0].priority, 5);
    }

    #[tokio::test]
    async fn enabled_kinds_reports_priorities_without_decrypting() {
        let (registry, org) = registry_with(&[
            (ProviderKind::OpenAi, "sk-openai", true, 1),
            (ProviderKind::Groq, "sk-groq", false, 2),
        ])
        .await;
        let kinds = registry.enabled_kinds(org).await.unwrap();
        assert_eq!(kinds, vec![(ProviderKind::OpenAi, 1)]);
    }

    #[tokio::test]
    async fn delete_removes_the_config() {
        let (registry, org) =
            registry_with(&[(ProviderKind::OpenAi, "sk", true, 1)]).await;
        assert!(registry.delete(org, ProviderKind::OpenAi).await.unwrap());
        assert!(!registry.delete(org, ProviderKind::OpenAi).await.unwrap());
        assert!(registry.resolve(org, None).await.unwrap().is_empty());
    }
}
