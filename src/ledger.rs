//! Append-only usage ledger with asynchronous batch flushing.
//!
//! Requests enqueue [`LedgerRow`]s into a bounded channel and move on — the
//! durable write happens on a background task in batches of `batch_size`
//! rows or every `flush_interval`, whichever comes first. A full queue
//! applies backpressure for a short window, then drops the row and counts
//! it: analytics may lose a row under saturation, requests never fail
//! because of the ledger.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::metrics::Metrics;
use crate::storage::{LedgerRow, Store};

/// How long `record` waits on a full queue before dropping the row.
const ENQUEUE_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            batch_size: 100,
            flush_interval: Duration::from_millis(500),
        }
    }
}

/// Cheap-to-clone sender half handed to the pipeline.
#[derive(Clone)]
pub struct LedgerHandle {
    tx: mpsc::Sender<LedgerRow>,
    metrics: Arc<Metrics>,
}

impl LedgerHandle {
    /// Enqueue a row. Applies backpressure up to [`ENQUEUE_WAIT`] when the
    /// queue is full, then drops the row and bumps the overflow counter.
    pub async fn record(&self, row: LedgerRow) {
        match self.tx.try_send(row) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(row)) => {
                match tokio::time::timeout(ENQUEUE_WAIT, self.tx.send(row)).await {
                    Ok(Ok(())) => {}
                    _ => {
                        warn!("ledger queue saturated — dropping row");
                        Metrics::incr(&self.metrics.ledger_dropped_total);
                    }
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Metrics::incr(&self.metrics.ledger_dropped_total);
            }
        }
    }
}

/// Start the flusher task. Returns the handle for producers and the join
/// handle `main` awaits (with a deadline) during shutdown. The flusher
/// drains and exits once every [`LedgerHandle`] clone has been dropped.
pub fn spawn_ledger(
    store: Arc<dyn Store>,
    metrics: Arc<Metrics>,
    settings: LedgerSettings,
) -> (LedgerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(settings.queue_capacity);
    let handle = LedgerHandle {
        tx,
        metrics: Arc::clone(&metrics),
    };
    let task = tokio::spawn(run_flusher(rx, store, metrics, settings));
    (handle, task)
}

async fn run_flusher(
    mut rx: mpsc::Receiver<LedgerRow>,
    store: Arc<dyn Store>,
    metrics: Arc<Metrics>,
    settings: LedgerSettings,
) {
    let mut buffer: Vec<LedgerRow> = Vec::with_capacity(settings.batch_size);
    let mut ticker = tokio::time::interval(settings.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(row) => {
                    buffer.push(row);
                    if buffer.len() >= settings.batch_size {
                        flush(&store, &metrics, &mut buffer).await;
                    }
                }
                // All senders gone — final drain, then exit.
                None => {
                    while let Ok(row) = rx.try_recv() {
                        buffer.push(row);
                    }
                    flush(&store, &metrics, &mut buffer).await;
                    debug!("ledger flusher drained and stopped");
                    return;
                }
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&store, &metrics, &mut buffer).await;
                }
            }
        }
    }
}

async fn flush(store: &Arc<dyn Store>, metrics: &Arc<Metrics>, buffer: &mut Vec<LedgerRow>) {
    if buffer.is_empty() {
        return;
    }
    let rows = std::mem::take(buffer);
    let count = rows.len() as u64;
    match store.insert_ledger_rows(&rows).await {
        Ok(()) => Metrics::add(&metrics.ledger_flushed_total, count),
        Err(e) => {
            warn!(rows = count, error = %e, "ledger batch write failed — rows lost");
            Metrics::add(&metrics.ledger_dropped_total, count);
        }
    }
}
