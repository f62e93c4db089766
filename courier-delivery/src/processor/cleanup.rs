//! Retention janitor for terminal records.

use std::{sync::Arc, time::Duration};

use chrono::{TimeDelta, Utc};
use courier_common::{Signal, internal};
use tokio::sync::broadcast;
use tracing::info;

use super::Inner;

pub(super) async fn run(inner: Arc<Inner>, mut shutdown: broadcast::Receiver<Signal>) {
    let retention = i64::try_from(inner.config.record_retention_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX);
    let mut timer =
        tokio::time::interval(Duration::from_secs(inner.config.cleanup_interval_secs.max(1)));
    timer.tick().await;

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
                    continue;
                };
                let purged = inner.queue.purge_terminal(cutoff);
                if purged > 0 {
                    info!(purged, "Purged expired delivery records");
                }
            }
            _ = shutdown.recv() => break,
        }
    }

    internal!("Retention janitor stopped");
}
