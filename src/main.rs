use std::future::IntoFuture;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

mod api;
mod backends;
mod cache;
mod config;
mod error;
mod fingerprint;
mod kv;
mod ledger;
mod limiter;
mod metrics;
mod models;
mod notify;
mod pipeline;
mod pricing;
mod registry;
mod routing;
mod scheduler;
mod secrets;
mod state;
mod storage;

use cache::TwoTierCache;
use config::Config;
use kv::{KvStore, MemoryKv, RedisKv};
use ledger::spawn_ledger;
use limiter::SlidingWindowLimiter;
use metrics::Metrics;
use notify::Notifier;
use registry::ProviderRegistry;
use scheduler::AlertScheduler;
use secrets::SecretBox;
use state::AppState;
use storage::{postgres::PgStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // When invoked as a Docker HEALTHCHECK, hit /healthz and exit
    // immediately. Avoids needing curl/wget in the container image.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cognitude=info,tower_http=warn".into()),
        )
        .init();

    let config_path = std::env::var("COGNITUDE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/cognitude/config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let config = Arc::new(config);

    info!(
        client_port = config.gateway.client_port,
        ops_port = config.gateway.ops_port,
        "cognitude starting"
    );

    // Relational store is mandatory: unreachable database or failed schema
    // creation is a fatal startup error.
    let database_url = config.database_url()?;
    let store: Arc<dyn Store> = Arc::new(
        PgStore::connect(&database_url, config.database.max_connections).await?,
    );

    let kv = connect_kv(&config).await?;

    if std::env::var(&config.gateway.api_key_salt_env).is_err() {
        warn!(
            env = %config.gateway.api_key_salt_env,
            "API-key salt env var unset — using the development salt"
        );
    }
    let secrets = match config.secrets_passphrase() {
        Some(passphrase) => SecretBox::from_passphrase(&passphrase)?,
        None => {
            warn!(
                env = %config.gateway.secrets_passphrase_env,
                "secrets passphrase env var unset — provider keys are sealed with a development key"
            );
            SecretBox::from_passphrase("cognitude-dev-passphrase")?
        }
    };

    let metrics = Arc::new(Metrics::default());
    let (ledger_handle, ledger_task) =
        spawn_ledger(Arc::clone(&store), Arc::clone(&metrics), config.ledger_settings());
    let notifier = Arc::new(Notifier::new(config.smtp_settings()));

    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        store: Arc::clone(&store),
        kv: Arc::clone(&kv),
        cache: Arc::new(TwoTierCache::new(
            Arc::clone(&kv),
            Arc::clone(&store),
            Arc::clone(&metrics),
            config.cache.ttl_hours,
        )),
        registry: ProviderRegistry::new(Arc::clone(&store), Arc::new(secrets)),
        limiter: SlidingWindowLimiter::new(Arc::clone(&kv)),
        ledger: ledger_handle,
        metrics: Arc::clone(&metrics),
        api_key_salt: config.api_key_salt(),
        started_at: std::time::Instant::now(),
        ops_token: config.ops_token(),
    });

    // One shutdown flag drives the listeners, the scheduler, and the
    // drain sequencing below.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let scheduler_task = if config.scheduler.enabled {
        let scheduler = Arc::new(AlertScheduler::new(
            Arc::clone(&store),
            notifier,
            Arc::clone(&metrics),
        ));
        Some(scheduler.spawn(config.scheduler_interval(), shutdown_rx.clone()))
    } else {
        info!("alert scheduler disabled by config");
        None
    };

    let client_addr: SocketAddr = format!("0.0.0.0:{}", config.gateway.client_port).parse()?;
    let ops_addr: SocketAddr = format!("0.0.0.0:{}", config.gateway.ops_port).parse()?;

    let client_listener = tokio::net::TcpListener::bind(client_addr).await?;
    let ops_listener = tokio::net::TcpListener::bind(ops_addr).await?;
    info!(%client_addr, "client API listening");
    info!(%ops_addr, "ops API listening");

    let trace_layer = || {
        tower_http::trace::TraceLayer::new_for_http()
            .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
            .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO))
    };

    let client_app = api::client_router(Arc::clone(&state)).layer(trace_layer());
    let ops_app = api::ops_router(Arc::clone(&state)).layer(trace_layer());

    let mut client_task = tokio::spawn(
        axum::serve(client_listener, client_app)
            .with_graceful_shutdown(await_flag(shutdown_rx.clone()))
            .into_future(),
    );
    let mut ops_task = tokio::spawn(
        axum::serve(ops_listener, ops_app)
            .with_graceful_shutdown(await_flag(shutdown_rx.clone()))
            .into_future(),
    );

    let mut shutdown_watch = shutdown_rx.clone();
    tokio::select! {
        result = &mut client_task => {
            result.context("client API task panicked")?.context("client API server error")?;
        }
        result = &mut ops_task => {
            result.context("ops API task panicked")?.context("ops API server error")?;
        }
        _ = shutdown_watch.changed() => {
            info!("shutdown signal received");
            let grace = config.shutdown_grace();
            let drained = tokio::time::timeout(grace, async {
                let _ = client_task.await;
                let _ = ops_task.await;
            })
            .await;
            if drained.is_err() {
                warn!(grace_ms = grace.as_millis() as u64,
                      "in-flight requests exceeded the grace period");
            }
        }
    }

    // Drop the last LedgerHandle so the flusher sees a closed channel and
    // drains, then bound the wait.
    drop(state);
    if tokio::time::timeout(config.ledger_drain_timeout(), ledger_task)
        .await
        .is_err()
    {
        warn!("ledger drain deadline exceeded — unflushed rows lost");
    }
    if let Some(task) = scheduler_task {
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
    }

    info!("cognitude stopped cleanly");
    Ok(())
}

/// Redis when configured; the in-process store otherwise. `kv.required`
/// upgrades any Redis problem to a fatal startup error.
async fn connect_kv(config: &Config) -> anyhow::Result<Arc<dyn KvStore>> {
    match config.kv_url() {
        Some(url) => match RedisKv::connect(&url).await {
            Ok(redis) => {
                info!("connected to Redis");
                Ok(Arc::new(redis))
            }
            Err(e) if config.kv.required => Err(e.context("kv.required is set")),
            Err(e) => {
                warn!(error = %e, "Redis unreachable — using the in-process KV store");
                Ok(Arc::new(MemoryKv::new()))
            }
        },
        None if config.kv.required => {
            anyhow::bail!(
                "kv.required is set but `{}` is not in the environment",
                config.kv.url_env
            )
        }
        None => {
            warn!("no Redis URL configured — rate limits and the fast cache tier are per-process");
            Ok(Arc::new(MemoryKv::new()))
        }
    }
}

async fn await_flag(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Lightweight healthcheck: GET /healthz on the ops port, exit 0 on 200.
async fn healthcheck() -> anyhow::Result<()> {
    let port = std::env::var("COGNITUDE_OPS_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(8081);

    let url = format!("http://127.0.0.1:{port}/healthz");
    let resp = reqwest::get(&url).await?;

    if resp.status().is_success() {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}
