//! Configuration types for the gateway.
//!
//! Config is loaded once at startup from a TOML file and validated before
//! the server opens any ports. Invalid configs are rejected with a clear
//! error rather than silently falling back to defaults. Secrets never live
//! in the file: every credential field names an environment variable whose
//! value is resolved at startup.

use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;

use crate::ledger::LedgerSettings;
use crate::models::ProviderKind;
use crate::notify::SmtpSettings;
use crate::routing::RouteMode;

/// Salt mixed into API-key hashes when the configured env var is unset.
/// Usable for development only; production deploys set the variable.
const DEV_KEY_SALT: &str = "cognitude-dev-salt";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub kv: KvConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Omit the section to disable the email channel.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub upstreams: UpstreamConfig,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.gateway.client_port != self.gateway.ops_port,
            "client_port and ops_port must differ"
        );
        anyhow::ensure!(
            self.gateway.request_timeout_ms > 0 && self.gateway.pipeline_timeout_ms > 0,
            "timeouts must be positive"
        );
        anyhow::ensure!(
            self.gateway.pipeline_timeout_ms >= self.gateway.request_timeout_ms,
            "pipeline_timeout_ms must cover at least one upstream attempt"
        );
        anyhow::ensure!(
            self.ledger.batch_size >= 1 && self.ledger.batch_size <= self.ledger.queue_capacity,
            "ledger batch_size must be in 1..=queue_capacity"
        );
        anyhow::ensure!(self.cache.ttl_hours >= 1, "cache ttl_hours must be at least 1");
        anyhow::ensure!(
            self.scheduler.interval_secs >= 1,
            "scheduler interval_secs must be at least 1"
        );
        match RouteMode::parse(&self.router.smart_mode) {
            Some(RouteMode::Cost) | Some(RouteMode::Balanced) => {}
            _ => anyhow::bail!(
                "router.smart_mode must be `cost` or `balanced`, got `{}`",
                self.router.smart_mode
            ),
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway.request_timeout_ms)
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway.pipeline_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.gateway.shutdown_grace_ms)
    }

    pub fn smart_mode(&self) -> RouteMode {
        RouteMode::parse(&self.router.smart_mode).unwrap_or(RouteMode::Cost)
    }

    /// Salt for tenant API-key hashing; falls back to a development salt
    /// (the caller logs the fallback).
    pub fn api_key_salt(&self) -> String {
        std::env::var(&self.gateway.api_key_salt_env).unwrap_or_else(|_| DEV_KEY_SALT.into())
    }

    pub fn secrets_passphrase(&self) -> Option<String> {
        std::env::var(&self.gateway.secrets_passphrase_env)
            .ok()
            .filter(|v| !v.is_empty())
    }

    pub fn ops_token(&self) -> Option<String> {
        self.gateway
            .ops_token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|v| !v.is_empty())
    }

    pub fn database_url(&self) -> anyhow::Result<String> {
        std::env::var(&self.database.url_env).with_context(|| {
            format!(
                "database connection string env var `{}` is not set",
                self.database.url_env
            )
        })
    }

    pub fn kv_url(&self) -> Option<String> {
        std::env::var(&self.kv.url_env).ok().filter(|v| !v.is_empty())
    }

    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            queue_capacity: self.ledger.queue_capacity,
            batch_size: self.ledger.batch_size,
            flush_interval: Duration::from_millis(self.ledger.flush_interval_ms),
        }
    }

    pub fn ledger_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger.drain_timeout_ms)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.interval_secs)
    }

    /// Resolve SMTP settings, reading credentials from the environment.
    /// Returns `None` when the section is absent or credentials are unset.
    pub fn smtp_settings(&self) -> Option<SmtpSettings> {
        let smtp = self.smtp.as_ref()?;
        let username = std::env::var(&smtp.username_env).ok()?;
        let password = std::env::var(&smtp.password_env).ok()?;
        Some(SmtpSettings {
            host: smtp.host.clone(),
            port: smtp.port,
            from: smtp.from.clone(),
            username,
            password,
        })
    }

    /// Upstream base-URL override for a provider, if configured.
    pub fn upstream_base_url(&self, kind: ProviderKind) -> Option<&str> {
        let url = match kind {
            ProviderKind::OpenAi => &self.upstreams.openai_base_url,
            ProviderKind::Anthropic => &self.upstreams.anthropic_base_url,
            ProviderKind::Mistral => &self.upstreams.mistral_base_url,
            ProviderKind::Groq => &self.upstreams.groq_base_url,
        };
        url.as_deref()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Tenant-facing API port (default: 8080).
    #[serde(default = "defaults::client_port")]
    pub client_port: u16,

    /// Operator port for /healthz and /metrics (default: 8081).
    #[serde(default = "defaults::ops_port")]
    pub ops_port: u16,

    /// Env var whose value is the bearer token required on the ops port.
    /// Unset means no ops auth (firewall the port instead).
    #[serde(default)]
    pub ops_token_env: Option<String>,

    /// Env var holding the API-key hash salt.
    #[serde(default = "defaults::api_key_salt_env")]
    pub api_key_salt_env: String,

    /// Env var holding the provider-credential encryption passphrase.
    #[serde(default = "defaults::secrets_passphrase_env")]
    pub secrets_passphrase_env: String,

    /// Per-upstream-call timeout in milliseconds (default: 30 000).
    #[serde(default = "defaults::request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Total pipeline budget in milliseconds (default: 35 000).
    #[serde(default = "defaults::pipeline_timeout_ms")]
    pub pipeline_timeout_ms: u64,

    /// Grace for in-flight requests on shutdown (default: 10 000).
    #[serde(default = "defaults::shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty gateway section deserializes to defaults")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Env var holding the PostgreSQL connection string.
    #[serde(default = "defaults::database_url_env")]
    pub url_env: String,

    #[serde(default = "defaults::max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty database section deserializes to defaults")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KvConfig {
    /// Env var holding the Redis URL.
    #[serde(default = "defaults::kv_url_env")]
    pub url_env: String,

    /// When true, an unreachable Redis is a fatal startup error. When
    /// false, the gateway degrades to its in-process store.
    #[serde(default)]
    pub required: bool,
}

impl Default for KvConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty kv section deserializes to defaults")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "defaults::yes")]
    pub enabled: bool,

    /// Fast-tier TTL and the default TTL stored on new durable entries.
    #[serde(default = "defaults::ttl_hours")]
    pub ttl_hours: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty cache section deserializes to defaults")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Routing mode for `/v1/smart/completions`: `cost` or `balanced`.
    #[serde(default = "defaults::smart_mode")]
    pub smart_mode: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty router section deserializes to defaults")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "defaults::queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,
    #[serde(default = "defaults::flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "defaults::drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty ledger section deserializes to defaults")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "defaults::yes")]
    pub enabled: bool,
    #[serde(default = "defaults::scheduler_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty scheduler section deserializes to defaults")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "defaults::smtp_port")]
    pub port: u16,
    /// Sender address on outgoing alerts.
    pub from: String,
    pub username_env: String,
    pub password_env: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub openai_base_url: Option<String>,
    #[serde(default)]
    pub anthropic_base_url: Option<String>,
    #[serde(default)]
    pub mistral_base_url: Option<String>,
    #[serde(default)]
    pub groq_base_url: Option<String>,
}

mod defaults {
    pub fn client_port() -> u16 { 8080 }
    pub fn ops_port() -> u16 { 8081 }
    pub fn api_key_salt_env() -> String { "COGNITUDE_KEY_SALT".into() }
    pub fn secrets_passphrase_env() -> String { "COGNITUDE_SECRETS_KEY".into() }
    pub fn request_timeout_ms() -> u64 { 30_000 }
    pub fn pipeline_timeout_ms() -> u64 { 35_000 }
    pub fn shutdown_grace_ms() -> u64 { 10_000 }
    pub fn database_url_env() -> String { "DATABASE_URL".into() }
    pub fn kv_url_env() -> String { "REDIS_URL".into() }
    pub fn yes() -> bool { true }
    pub fn ttl_hours() -> i64 { 1 }
    pub fn smart_mode() -> String { "cost".into() }
    pub fn queue_capacity() -> usize { 1024 }
    pub fn batch_size() -> usize { 100 }
    pub fn flush_interval_ms() -> u64 { 500 }
    pub fn drain_timeout_ms() -> u64 { 5_000 }
    pub fn scheduler_interval_secs() -> u64 { 900 }
    pub fn smtp_port() -> u16 { 587 }
    pub fn max_connections() -> u32 { 10 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_example_config() {
        let content = include_str!("../config.example.toml");
        let config: Config = toml::from_str(content).expect("example config should parse");
        config.validate().expect("example config should be valid");
    }

    #[test]
    fn empty_config_gets_all_defaults() {
        let config: Config = toml::from_str("").expect("empty config should parse");
        assert_eq!(config.gateway.client_port, 8080);
        assert_eq!(config.gateway.ops_port, 8081);
        assert_eq!(config.gateway.request_timeout_ms, 30_000);
        assert_eq!(config.cache.ttl_hours, 1);
        assert_eq!(config.ledger.batch_size, 100);
        assert_eq!(config.scheduler.interval_secs, 900);
        assert!(config.smtp.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_colliding_ports() {
        let config: Config = toml::from_str(
            r#"
            [gateway]
            client_port = 9000
            ops_port = 9000
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_batch_size() {
        let config: Config = toml::from_str(
            r#"
            [ledger]
            batch_size = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_batch_larger_than_queue() {
        let config: Config = toml::from_str(
            r#"
            [ledger]
            queue_capacity = 10
            batch_size = 50
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_unknown_smart_mode() {
        let config: Config = toml::from_str(
            r#"
            [router]
            smart_mode = "yolo"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_explicit_as_smart_mode() {
        // `explicit` is an endpoint behavior, not a smart-routing policy.
        let config: Config = toml::from_str(
            r#"
            [router]
            smart_mode = "explicit"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn pipeline_timeout_must_cover_request_timeout() {
        let config: Config = toml::from_str(
            r#"
            [gateway]
            request_timeout_ms = 30000
            pipeline_timeout_ms = 1000
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn smart_mode_accessor_parses_balanced() {
        let config: Config = toml::from_str(
            r#"
            [router]
            smart_mode = "balanced"
            "#,
        )
        .unwrap();
        assert_eq!(config.smart_mode(), RouteMode::Balanced);
    }

    #[test]
    fn upstream_overrides_resolve_per_provider() {
        let config: Config = toml::from_str(
            r#"
            [upstreams]
            openai_base_url = "http://localhost:9999"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.upstream_base_url(ProviderKind::OpenAi),
            Some("http://localhost:9999")
        );
        assert_eq!(config.upstream_base_url(ProviderKind::Groq), None);
    }

    #[test]
    fn smtp_settings_require_env_credentials() {
        let config: Config = toml::from_str(
            r#"
            [smtp]
            host = "smtp.example.com"
            from = "alerts@example.com"
            username_env = "COG_TEST_SMTP_USER_UNSET_XYZ"
            password_env = "COG_TEST_SMTP_PASS_UNSET_XYZ"
            "#,
        )
        .unwrap();
        assert!(config.smtp_settings().is_none(), "unset env vars → no SMTP");
    }
}
