//! Periodic spend-threshold evaluation.
//!
//! One driver task ticks every `interval` (default 15 min). Ticks never
//! overlap: the job body is guarded by a `try_lock` mutex, and a tick that
//! finds the previous run still going is skipped, not queued — the same
//! goes for ticks missed while the process was descheduled. Per tenant and
//! enabled alert config the job aggregates the ledger over the config's
//! window, fires through every active channel when the threshold is met,
//! and stamps `last_triggered` so each (tenant, kind, window instance)
//! alerts at most once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::metrics::Metrics;
use crate::notify::{Alert, DispatchOutcome, Notifier};
use crate::storage::{AlertConfigRow, AlertKind, Store};

/// Rolling window for the warning kinds (open question (d): the source
/// leaves it unspecified; one hour keeps warnings timely without flapping).
const ROLLING_WINDOW: Duration = Duration::from_secs(3600);

/// Minimum requests in the rolling window before a hit-rate warning can
/// fire — a handful of requests is noise, not a trend.
const HIT_RATE_MIN_SAMPLE: i64 = 20;

pub struct AlertScheduler {
    store: Arc<dyn Store>,
    notifier: Arc<Notifier>,
    metrics: Arc<Metrics>,
    job_lock: tokio::sync::Mutex<()>,
}

impl AlertScheduler {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<Notifier>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            notifier,
            metrics,
            job_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Start the periodic driver. Stops when `shutdown` flips to true.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so startup is quiet.
            ticker.tick().await;

            info!(interval_secs = interval.as_secs(), "alert scheduler started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.job_lock.try_lock() {
                            Ok(_guard) => {
                                Metrics::incr(&self.metrics.scheduler_runs_total);
                                if let Err(e) = self.run_once(Utc::now()).await {
                                    error!(error = %e, "alert evaluation failed — will retry next tick");
                                }
                            }
                            Err(_) => {
                                warn!("previous alert evaluation still running — skipping tick");
                                Metrics::incr(&self.metrics.scheduler_skipped_total);
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("alert scheduler stopping");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// One full evaluation pass. Tenant-level failures are contained so one
    /// broken tenant cannot starve the rest.
    pub async fn run_once(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        for (org_id, name) in self.store.orgs_with_enabled_alerts().await? {
            if let Err(e) = self.evaluate_tenant(org_id, &name, now).await {
                warn!(org_id, error = %e, "tenant alert evaluation failed");
            }
        }
        Ok(())
    }

    async fn evaluate_tenant(
        &self,
        org_id: i64,
        tenant_name: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let configs = self.store.alert_configs(org_id).await?;
        for cfg in configs.iter().filter(|c| c.enabled) {
            let window_start = window_start(cfg.kind, now);
            if !rearmed(cfg.last_triggered, window_start) {
                continue;
            }

            let observed = match self.observe(org_id, cfg.kind, window_start, now).await? {
                Some(value) => value,
                None => continue, // below minimum sample
            };
            if !breaches(cfg, observed) {
                continue;
            }

            let alert = Alert {
                kind: cfg.kind,
                tenant: tenant_name.to_string(),
                threshold: cfg.threshold,
                observed,
                window: window_label(cfg.kind, now),
                detected_at: now,
            };

            let channels = self.store.alert_channels(org_id).await?;
            let mut delivered = false;
            for channel in channels.iter().filter(|c| c.active) {
                match self.notifier.dispatch(channel, &alert).await {
                    DispatchOutcome::Delivered => delivered = true,
                    DispatchOutcome::Transient(e) | DispatchOutcome::Permanent(e) => {
                        warn!(org_id, channel = channel.id, kind = %cfg.kind, error = %e,
                              "alert channel delivery failed");
                    }
                }
            }

            // Only a delivered alert consumes the window instance; total
            // failure leaves the config armed for the next tick.
            if delivered {
                self.store
                    .stamp_alert_triggered(org_id, cfg.kind, now)
                    .await?;
                Metrics::incr(&self.metrics.alerts_sent_total);
                info!(org_id, kind = %cfg.kind, observed, "alert delivered");
            }
        }
        Ok(())
    }

    /// The observed value for a config's window, or `None` when the sample
    /// is too small to judge.
    async fn observe(
        &self,
        org_id: i64,
        kind: AlertKind,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<f64>> {
        Ok(match kind {
            AlertKind::DailyCost | AlertKind::MonthlyCost => {
                Some(self.store.cost_between(org_id, window_start, now).await?)
            }
            AlertKind::RateLimitWarning => {
                let (total, _) = self
                    .store
                    .request_stats_between(org_id, window_start, now)
                    .await?;
                Some(total as f64)
            }
            AlertKind::CacheHitWarning => {
                let (total, hits) = self
                    .store
                    .request_stats_between(org_id, window_start, now)
                    .await?;
                (total >= HIT_RATE_MIN_SAMPLE)
                    .then(|| 100.0 * hits as f64 / total as f64)
            }
        })
    }
}

/// Start of the window instance a config is evaluated against.
pub fn window_start(kind: AlertKind, now: DateTime<Utc>) -> DateTime<Utc> {
    match kind {
        AlertKind::DailyCost => now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc(),
        AlertKind::MonthlyCost => NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
            .expect("first of the month is always valid")
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc(),
        AlertKind::RateLimitWarning | AlertKind::CacheHitWarning => {
            now - chrono::Duration::from_std(ROLLING_WINDOW).expect("fixed window fits")
        }
    }
}

/// Human-readable window label for the alert payload.
pub fn window_label(kind: AlertKind, now: DateTime<Utc>) -> String {
    match kind {
        AlertKind::DailyCost => now.format("%Y-%m-%d").to_string(),
        AlertKind::MonthlyCost => now.format("%Y-%m").to_string(),
        AlertKind::RateLimitWarning | AlertKind::CacheHitWarning => "rolling 1h".to_string(),
    }
}

/// A config may fire only when it has not already fired in this window
/// instance.
pub fn rearmed(last_triggered: Option<DateTime<Utc>>, window_start: DateTime<Utc>) -> bool {
    last_triggered.is_none_or(|last| last < window_start)
}

/// Threshold comparison. Cost and volume alerts fire at-or-above; the
/// hit-rate warning fires when the rate falls below the threshold.
fn breaches(cfg: &AlertConfigRow, observed: f64) -> bool {
    match cfg.kind {
        AlertKind::CacheHitWarning => observed < cfg.threshold,
        _ => observed >= cfg.threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemStore;
    use crate::storage::{ChannelKind, LedgerRow};
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // -----------------------------------------------------------------------
    // Window math — pure
    // -----------------------------------------------------------------------

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn daily_window_starts_at_utc_midnight() {
        let now = at(2026, 8, 1, 14, 30);
        assert_eq!(window_start(AlertKind::DailyCost, now), at(2026, 8, 1, 0, 0));
    }

    #[test]
    fn monthly_window_starts_on_the_first() {
        let now = at(2026, 8, 17, 9, 0);
        assert_eq!(
            window_start(AlertKind::MonthlyCost, now),
            at(2026, 8, 1, 0, 0)
        );
    }

    #[test]
    fn rolling_window_is_one_hour() {
        let now = at(2026, 8, 1, 14, 30);
        assert_eq!(
            window_start(AlertKind::CacheHitWarning, now),
            at(2026, 8, 1, 13, 30)
        );
    }

    #[test]
    fn rearmed_when_never_triggered_or_before_window() {
        let window = at(2026, 8, 1, 0, 0);
        assert!(rearmed(None, window));
        assert!(rearmed(Some(at(2026, 7, 31, 23, 59)), window));
        assert!(!rearmed(Some(at(2026, 8, 1, 8, 0)), window));
    }

    // -----------------------------------------------------------------------
    // run_once against the in-memory store
    // -----------------------------------------------------------------------

    struct Fixture {
        scheduler: AlertScheduler,
        store: Arc<MemStore>,
        org_id: i64,
        _server: MockServer,
    }

    async fn fixture(kind: AlertKind, threshold: f64, webhook_status: u16) -> Fixture {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(webhook_status))
            .mount(&server)
            .await;

        let store = Arc::new(MemStore::new());
        let org_id = store.insert_tenant("acme", "hash").await.unwrap();
        store
            .upsert_alert_config(&AlertConfigRow {
                org_id,
                kind,
                threshold,
                enabled: true,
                last_triggered: None,
            })
            .await
            .unwrap();
        store
            .insert_alert_channel(
                org_id,
                ChannelKind::ChatWebhook,
                &json!({"url": format!("{}/hook", server.uri())}),
                true,
            )
            .await
            .unwrap();

        let notifier = Arc::new(
            Notifier::new(None).with_backoff_base(Duration::from_millis(1)),
        );
        let scheduler = AlertScheduler::new(
            store.clone() as Arc<dyn Store>,
            notifier,
            Arc::new(Metrics::default()),
        );
        Fixture {
            scheduler,
            store,
            org_id,
            _server: server,
        }
    }

    fn cost_row(org_id: i64, cost: f64) -> LedgerRow {
        LedgerRow::success(
            org_id,
            "gpt-4o",
            "/v1/chat/completions",
            "openai",
            "gpt-4o",
            100,
            50,
            cost,
            200,
            "fp",
        )
    }

    async fn received_hooks(server: &MockServer) -> usize {
        server.received_requests().await.unwrap().len()
    }

    #[tokio::test]
    async fn daily_cost_alert_fires_once_per_window_instance() {
        let f = fixture(AlertKind::DailyCost, 0.01, 200).await;
        f.store
            .insert_ledger_rows(&[cost_row(f.org_id, 0.02)])
            .await
            .unwrap();

        let now = Utc::now();
        f.scheduler.run_once(now).await.unwrap();
        assert_eq!(received_hooks(&f._server).await, 1);

        // Same window instance: no second delivery, even with more spend.
        f.store
            .insert_ledger_rows(&[cost_row(f.org_id, 0.05)])
            .await
            .unwrap();
        f.scheduler.run_once(now + chrono::Duration::minutes(15)).await.unwrap();
        assert_eq!(received_hooks(&f._server).await, 1);

        let cfg = &f.store.alert_configs(f.org_id).await.unwrap()[0];
        assert!(cfg.last_triggered.is_some());
    }

    #[tokio::test]
    async fn below_threshold_does_not_fire() {
        let f = fixture(AlertKind::DailyCost, 1.0, 200).await;
        f.store
            .insert_ledger_rows(&[cost_row(f.org_id, 0.02)])
            .await
            .unwrap();
        f.scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(received_hooks(&f._server).await, 0);
    }

    #[tokio::test]
    async fn disabled_config_never_fires() {
        let f = fixture(AlertKind::DailyCost, 0.01, 200).await;
        f.store
            .upsert_alert_config(&AlertConfigRow {
                org_id: f.org_id,
                kind: AlertKind::DailyCost,
                threshold: 0.01,
                enabled: false,
                last_triggered: None,
            })
            .await
            .unwrap();
        f.store
            .insert_ledger_rows(&[cost_row(f.org_id, 5.0)])
            .await
            .unwrap();
        f.scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(received_hooks(&f._server).await, 0);
    }

    #[tokio::test]
    async fn failed_delivery_leaves_the_config_armed() {
        let f = fixture(AlertKind::DailyCost, 0.01, 400).await;
        f.store
            .insert_ledger_rows(&[cost_row(f.org_id, 0.02)])
            .await
            .unwrap();

        f.scheduler.run_once(Utc::now()).await.unwrap();
        let cfg = &f.store.alert_configs(f.org_id).await.unwrap()[0];
        assert!(
            cfg.last_triggered.is_none(),
            "permanent channel failure must not consume the window"
        );

        // Next tick tries again.
        f.scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(received_hooks(&f._server).await, 2);
    }

    #[tokio::test]
    async fn cache_hit_warning_fires_on_low_rate_with_enough_sample() {
        let f = fixture(AlertKind::CacheHitWarning, 50.0, 200).await;
        // 25 requests, 2 hits → 8% hit rate.
        let mut rows = Vec::new();
        for i in 0..25 {
            if i < 2 {
                rows.push(LedgerRow::cache_hit(
                    f.org_id,
                    "gpt-4o",
                    "/v1/chat/completions",
                    "openai",
                    "gpt-4o",
                    2,
                    "fp",
                ));
            } else {
                rows.push(cost_row(f.org_id, 0.001));
            }
        }
        f.store.insert_ledger_rows(&rows).await.unwrap();

        f.scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(received_hooks(&f._server).await, 1);
    }

    #[tokio::test]
    async fn cache_hit_warning_needs_a_minimum_sample() {
        let f = fixture(AlertKind::CacheHitWarning, 50.0, 200).await;
        f.store
            .insert_ledger_rows(&[cost_row(f.org_id, 0.001)])
            .await
            .unwrap();
        f.scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(received_hooks(&f._server).await, 0);
    }

    #[tokio::test]
    async fn rate_limit_warning_fires_on_request_volume() {
        let f = fixture(AlertKind::RateLimitWarning, 10.0, 200).await;
        let rows: Vec<LedgerRow> = (0..12).map(|_| cost_row(f.org_id, 0.0001)).collect();
        f.store.insert_ledger_rows(&rows).await.unwrap();

        f.scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(received_hooks(&f._server).await, 1);
    }
}
