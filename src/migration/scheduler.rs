//! Periodic auto-run sweep

use super::engine::WorkflowEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Run [`WorkflowEngine::run_auto_sweep`] every `interval` until the task is
/// aborted. A failed sweep is logged and retried on the next tick.
pub fn spawn(engine: Arc<WorkflowEngine>, interval: Duration) -> JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "Auto-run sweep scheduled");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match engine.run_auto_sweep().await {
                Ok(report) if report.started + report.renamed > 0 => {
                    info!(started = report.started, renamed = report.renamed, "Auto-run sweep finished")
                }
                Ok(_) => debug!("Auto-run sweep found nothing to do"),
                Err(e) => error!("Auto-run sweep failed: {}", e),
            }
        }
    })
}
