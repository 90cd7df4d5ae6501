//! Periodic recovery of abandoned execution slots.
//!
//! Sessions that stop heartbeating lose their queue entry on the next
//! admission call anyway; the sweeper makes sure their instance locks are
//! freed even when nobody else asks for a slot.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::state::CoordinationHub;

/// Run the sweep loop until `cancel` is triggered.
pub async fn run(hub: Arc<CoordinationHub>, every: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = every.as_secs(), "Slot sweeper started");

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Slot sweeper stopping");
                break;
            }
            _ = interval.tick() => {
                let purged = hub.sweep_stale().await;
                if purged.is_empty() {
                    tracing::debug!("Slot sweeper: nothing stale");
                } else {
                    tracing::info!(purged = purged.len(), "Slot sweeper: recovered abandoned slots");
                }
            }
        }
    }
}
