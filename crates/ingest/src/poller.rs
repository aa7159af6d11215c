//! Background loop that drives scheduled ingestion.
//!
//! Every `poll_interval` it asks the service to run whatever the scheduler
//! backend reports as due at the service clock's "now". Errors from a sweep
//! are logged and the loop carries on with the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::service::IngestionSchedulingService;

/// Run the ingestion scheduler until `shutdown` is notified.
///
/// Use `notify_one` to stop it; the permit is kept if the loop is mid-sweep,
/// so the loop exits after the current sweep finishes.
pub async fn run_ingestion_scheduler(
    service: Arc<IngestionSchedulingService>,
    poll_interval: Duration,
    shutdown: Arc<Notify>,
) {
    info!("ingestion scheduler started (poll interval: {}ms)", poll_interval.as_millis());

    loop {
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown.notified() => break,
        }

        let as_of = service.clock().now();
        match service.run_due_jobs(as_of).await {
            Ok(report) if report.due > 0 => debug!(
                due = report.due,
                failed = report.failed,
                "scheduler: sweep complete"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "scheduler: failed to poll due jobs"),
        }
    }

    info!("ingestion scheduler stopped");
}
