//! Message delivery worker.
//!
//! Background loop that drains sessions' message queues through the engine's
//! pacer. Wakes on `Notify`, on a periodic poll, or on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::engine::FlowEngine;

/// Default interval between polls when nothing signals new work.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Run the delivery worker loop until `shutdown` flips to `true`.
pub async fn delivery_loop(
    engine: Arc<FlowEngine>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let notify = engine.delivery_notify();
    loop {
        if *shutdown.borrow() {
            break;
        }

        run_pass(&engine).await;

        tokio::select! {
            _ = notify.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("delivery worker stopped");
}

/// One delivery pass over every session with pending fragments, followed by
/// pruning of idle lock slots.
pub async fn run_pass(engine: &FlowEngine) -> usize {
    let delivered = match engine.deliver_all().await {
        Ok(reports) => {
            let delivered = reports.iter().map(|r| r.delivered).sum();
            if delivered > 0 {
                debug!(delivered, sessions = reports.len(), "delivery pass finished");
            }
            delivered
        }
        Err(e) => {
            warn!(error = %e, "delivery pass failed");
            0
        }
    };

    let pruned = engine.prune_locks();
    if pruned > 0 {
        debug!(pruned, "pruned idle lock slots");
    }
    delivered
}
