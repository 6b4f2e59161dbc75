//! Per-tenant sliding-window rate limiting over the shared KV store.
//!
//! Three fixed windows (minute, hour, day), one counter per
//! `(tenant, window, bucket)`. The sliding estimate weights the previous
//! bucket by the fraction of the current window still overlapping it:
//!
//! ```text
//! estimate = prev · (1 − elapsed/window) + current
//! ```
//!
//! Counters are plain atomic increments, so any number of gateway processes
//! sharing one Redis enforce one fleet-wide limit. The approximation can
//! overshoot by at most one request per bucket boundary, which the stated
//! limits tolerate.

use std::sync::Arc;
use std::time::Duration;

use crate::kv::KvStore;
use crate::storage::RateLimitConfigRow;

/// The three enforcement windows, smallest first.
pub const WINDOWS: [(u64, &str); 3] = [(60, "minute"), (3600, "hour"), (86400, "day")];

/// Per-window snapshot returned with every decision; the API layer turns
/// these into `x-ratelimit-*` response headers.
#[derive(Debug, Clone)]
pub struct WindowState {
    pub label: &'static str,
    pub window_secs: u64,
    pub limit: i64,
    /// Sliding estimate including the current request.
    pub used: i64,
    pub remaining: i64,
    /// Seconds until this window's bucket rolls over.
    pub reset_secs: u64,
}

#[derive(Debug, Clone)]
pub enum Decision {
    Allowed(Vec<WindowState>),
    Denied {
        retry_after: u64,
        windows: Vec<WindowState>,
    },
}

pub struct SlidingWindowLimiter {
    kv: Arc<dyn KvStore>,
}

impl SlidingWindowLimiter {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Count this request against all three windows and decide.
    ///
    /// The estimate deliberately excludes the request being counted: a
    /// tenant with `per_minute = 2` gets exactly two requests through
    /// before the third is denied.
    pub async fn check(
        &self,
        org_id: i64,
        cfg: &RateLimitConfigRow,
        now_unix: i64,
    ) -> anyhow::Result<Decision> {
        if !cfg.enabled {
            return Ok(Decision::Allowed(Vec::new()));
        }

        let limits = [cfg.per_minute, cfg.per_hour, cfg.per_day];
        let mut states = Vec::with_capacity(WINDOWS.len());
        let mut retry_after: Option<u64> = None;

        for ((window, label), limit) in WINDOWS.into_iter().zip(limits) {
            let bucket = bucket_start(now_unix, window);
            let elapsed = (now_unix - bucket) as u64;

            let current = self
                .kv
                .incr(
                    &counter_key(org_id, window, bucket),
                    // Twice the window so the previous bucket stays readable
                    // for the whole sliding period.
                    Duration::from_secs(window * 2),
                )
                .await?;
            let prev = self
                .kv
                .read_count(&counter_key(org_id, window, bucket - window as i64))
                .await?;

            let estimate = sliding_estimate(prev, current - 1, elapsed, window);
            let used = estimate.ceil() as i64 + 1;
            states.push(WindowState {
                label,
                window_secs: window,
                limit,
                used,
                remaining: (limit - used).max(0),
                reset_secs: window - elapsed,
            });

            if estimate >= limit as f64 && retry_after.is_none() {
                // Windows iterate smallest-first, so the first exceeded one
                // is the one whose rollover the client should wait for.
                retry_after = Some(window - elapsed);
            }
        }

        Ok(match retry_after {
            Some(retry_after) => Decision::Denied {
                retry_after,
                windows: states,
            },
            None => Decision::Allowed(states),
        })
    }
}

pub(crate) fn counter_key(org_id: i64, window: u64, bucket: i64) -> String {
    format!("rl:{org_id}:{window}:{bucket}")
}

fn bucket_start(now_unix: i64, window: u64) -> i64 {
    now_unix - now_unix.rem_euclid(window as i64)
}

/// The weighted two-bucket estimate, excluding the request being decided.
pub fn sliding_estimate(prev: i64, current: i64, elapsed: u64, window: u64) -> f64 {
    let weight = 1.0 - elapsed as f64 / window as f64;
    prev as f64 * weight + current as f64
}
