//! Process-wide counters and the Prometheus `/metrics` rendering.
//!
//! Counters are plain relaxed atomics — every hot-path site does a single
//! `fetch_add`. Rendering walks the struct and emits Prometheus text format;
//! all families are monotone counters over the process lifetime.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    /// Requests accepted into the pipeline (any endpoint).
    pub requests_total: AtomicU64,
    /// Requests denied by the rate limiter.
    pub rate_limited_total: AtomicU64,
    /// Fast-tier cache hits and misses.
    pub cache_fast_hits: AtomicU64,
    pub cache_fast_misses: AtomicU64,
    /// Durable-tier hits (fast tier missed, relational row found).
    pub cache_durable_hits: AtomicU64,
    /// A cache tier errored and the lookup fell through silently.
    pub cache_degraded: AtomicU64,
    /// Upstream attempts that failed with a retryable class.
    pub upstream_errors_total: AtomicU64,
    /// Requests that succeeded only after failing over.
    pub failovers_total: AtomicU64,
    /// Ledger rows dropped because the queue stayed full past the
    /// backpressure window, plus rows lost to write errors.
    pub ledger_dropped_total: AtomicU64,
    /// Ledger rows durably written.
    pub ledger_flushed_total: AtomicU64,
    /// Scheduler ticks that ran vs. were skipped because the previous run
    /// still held the job lock.
    pub scheduler_runs_total: AtomicU64,
    pub scheduler_skipped_total: AtomicU64,
    /// Alerts successfully delivered through at least one channel.
    pub alerts_sent_total: AtomicU64,
}

impl Metrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Render every family in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(2048);

        let mut family = |name: &str, help: &str, value: u64| {
            out.push_str(&format!("# HELP {name} {help}\n"));
            out.push_str(&format!("# TYPE {name} counter\n"));
            out.push_str(&format!("{name} {value}\n\n"));
        };

        family(
            "cognitude_requests_total",
            "Requests accepted into the pipeline.",
            Self::get(&self.requests_total),
        );
        family(
            "cognitude_rate_limited_total",
            "Requests denied by the sliding-window limiter.",
            Self::get(&self.rate_limited_total),
        );
        family(
            "cognitude_cache_fast_hits_total",
            "Fast-tier cache hits.",
            Self::get(&self.cache_fast_hits),
        );
        family(
            "cognitude_cache_fast_misses_total",
            "Fast-tier cache misses.",
            Self::get(&self.cache_fast_misses),
        );
        family(
            "cognitude_cache_durable_hits_total",
            "Durable-tier cache hits after a fast-tier miss.",
            Self::get(&self.cache_durable_hits),
        );
        family(
            "cognitude_cache_degraded_total",
            "Cache tier errors that fell through silently.",
            Self::get(&self.cache_degraded),
        );
        family(
            "cognitude_upstream_errors_total",
            "Upstream attempts that failed with a retryable class.",
            Self::get(&self.upstream_errors_total),
        );
        family(
            "cognitude_failovers_total",
            "Requests served only after provider failover.",
            Self::get(&self.failovers_total),
        );
        family(
            "cognitude_ledger_dropped_total",
            "Ledger rows dropped under saturation or write failure.",
            Self::get(&self.ledger_dropped_total),
        );
        family(
            "cognitude_ledger_flushed_total",
            "Ledger rows durably written.",
            Self::get(&self.ledger_flushed_total),
        );
        family(
            "cognitude_scheduler_runs_total",
            "Alert evaluation runs completed.",
            Self::get(&self.scheduler_runs_total),
        );
        family(
            "cognitude_scheduler_skipped_total",
            "Scheduler ticks skipped because a run was still in progress.",
            Self::get(&self.scheduler_skipped_total),
        );
        family(
            "cognitude_alerts_sent_total",
            "Alerts delivered through at least one channel.",
            Self::get(&self.alerts_sent_total),
        );

        out
    }
}
