use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;
use crate::engine::now_ms;

/// Periodic overdue scan. Purely for alerting: overdue is derived on every
/// read, so nothing is written here.
pub async fn run_overdue_monitor(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        scan_overdue(&engine).await;
    }
}

/// One pass of the overdue scan. Returns how many reservations are overdue.
pub async fn scan_overdue(engine: &Engine) -> usize {
    let overdue = engine.overdue_reservations(now_ms()).await;
    metrics::gauge!(crate::observability::OVERDUE_RESERVATIONS).set(overdue.len() as f64);
    for info in &overdue {
        let r = &info.reservation;
        warn!(
            "overdue: {} ({}) on {} ended at {}, status {}",
            r.code, r.id, r.resource_id, r.window.end, r.status
        );
    }
    let pruned = engine.notify.prune();
    if pruned > 0 {
        tracing::debug!("pruned {pruned} idle notification channels");
    }
    overdue.len()
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        maybe_compact(&engine, threshold).await;
    }
}

pub async fn maybe_compact(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(events) => {
            info!("compacted WAL after {appends} appends ({events} events kept)");
            true
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}
