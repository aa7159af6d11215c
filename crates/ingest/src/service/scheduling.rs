use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use biosource_core::{IngestionTrigger, Source};
use biosource_scheduler::{policy, ScheduledJob};

use crate::error::IngestionError;
use crate::events::IngestionEvent;

use super::core::RunReport;
use super::execution::ExecutionContext;
use super::IngestionSchedulingService;

/// Result of one due job within a sweep.
enum DueOutcome {
    Succeeded,
    Partial,
    Failed,
    Skipped,
}

impl IngestionSchedulingService {
    /// Register a source's schedule with the backend and store the backend
    /// job id back onto the source.
    pub async fn schedule_source(&self, source_id: Uuid) -> Result<ScheduledJob, IngestionError> {
        let source = self
            .sources
            .find_by_id(source_id)
            .await?
            .ok_or(IngestionError::NotFound(source_id))?;
        self.register_source(&source).await
    }

    /// Remove a source's job from the backend. Succeeds when nothing was registered.
    pub async fn unschedule_source(&self, source_id: Uuid) -> Result<(), IngestionError> {
        let source = self
            .sources
            .find_by_id(source_id)
            .await?
            .ok_or(IngestionError::NotFound(source_id))?;

        let Some(job_id) = source.ingestion_schedule.backend_job_id.as_deref() else {
            debug!(source_id = %source_id, "unschedule: source has no backend job");
            return Ok(());
        };

        match self.backend.remove_job(job_id) {
            Ok(removed) => {
                info!(source_id = %source_id, job_id = %job_id, removed, "source unscheduled");
                if removed {
                    self.events.publish(IngestionEvent::ScheduleRemoved {
                        source_id,
                        scheduled_job_id: job_id.to_string(),
                    });
                }
            }
            Err(e) => warn!(
                source_id = %source_id,
                job_id = %job_id,
                error = %e,
                "unschedule: failed to remove backend job"
            ),
        }
        Ok(())
    }

    /// Re-register every schedulable source. Returns how many were registered.
    ///
    /// The backend is in-memory, so this runs once at startup. Sources that
    /// cannot be registered (for example cron schedules) are logged and skipped.
    pub async fn restore_schedules(&self) -> Result<usize, IngestionError> {
        let sources = self.sources.find_schedulable().await?;
        let total = sources.len();
        let mut restored = 0;

        for source in &sources {
            match self.register_source(source).await {
                Ok(_) => restored += 1,
                Err(e) => warn!(
                    source_id = %source.id,
                    source_name = %source.name,
                    error = %e,
                    "restore: skipping source"
                ),
            }
        }

        info!(restored, total, "scheduled sources restored");
        Ok(restored)
    }

    /// Execute every job due at `as_of`.
    ///
    /// Jobs are isolated: a failure in one is logged and counted, and never
    /// stops the others. At most `max_concurrent_jobs` run at once.
    pub async fn run_due_jobs(&self, as_of: DateTime<Utc>) -> Result<RunReport, IngestionError> {
        let due = self.backend.get_due_jobs(as_of)?;
        let mut report = RunReport {
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        info!(due = report.due, as_of = %as_of, "running due ingestion jobs");

        let outcomes: Vec<DueOutcome> = stream::iter(due)
            .map(|job| self.run_scheduled(job))
            .buffer_unordered(self.options.max_concurrent_jobs)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                DueOutcome::Succeeded => report.succeeded += 1,
                DueOutcome::Partial => report.partial += 1,
                DueOutcome::Failed => report.failed += 1,
                DueOutcome::Skipped => report.skipped += 1,
            }
        }

        info!(
            due = report.due,
            succeeded = report.succeeded,
            partial = report.partial,
            failed = report.failed,
            skipped = report.skipped,
            "due ingestion jobs finished"
        );
        Ok(report)
    }

    async fn register_source(&self, source: &Source) -> Result<ScheduledJob, IngestionError> {
        let schedule = &source.ingestion_schedule;
        policy::validate(schedule)?;

        let job = self.backend.register_job(source.id, schedule)?;
        self.sources
            .update_ingestion_schedule(source.id, &schedule.with_backend_job_id(job.job_id.clone()))
            .await?;

        info!(
            source_id = %source.id,
            source_name = %source.name,
            job_id = %job.job_id,
            frequency = %schedule.frequency,
            next_run_at = %job.next_run_at,
            "source scheduled"
        );
        self.events.publish(IngestionEvent::ScheduleRegistered {
            source_id: source.id,
            scheduled_job_id: job.job_id.clone(),
            next_run_at: job.next_run_at,
        });
        Ok(job)
    }

    async fn run_scheduled(&self, scheduled: ScheduledJob) -> DueOutcome {
        let source = match self.sources.find_by_id(scheduled.source_id).await {
            Ok(Some(source)) => source,
            Ok(None) => {
                warn!(
                    job_id = %scheduled.job_id,
                    source_id = %scheduled.source_id,
                    "scheduler: source no longer exists, removing scheduled job"
                );
                if let Err(e) = self.backend.remove_job(&scheduled.job_id) {
                    warn!(job_id = %scheduled.job_id, error = %e, "scheduler: failed to remove orphaned job");
                }
                return DueOutcome::Failed;
            }
            Err(e) => {
                error!(
                    job_id = %scheduled.job_id,
                    source_id = %scheduled.source_id,
                    error = %e,
                    "scheduler: failed to load source"
                );
                return DueOutcome::Failed;
            }
        };

        let ctx = ExecutionContext {
            scheduled_job_id: Some(&scheduled.job_id),
            ..Default::default()
        };
        match self.execute(source, IngestionTrigger::Scheduled, ctx).await {
            Ok(summary) if summary.is_partial() => DueOutcome::Partial,
            Ok(_) => DueOutcome::Succeeded,
            Err(IngestionError::AlreadyRunning(source_id)) => {
                info!(
                    job_id = %scheduled.job_id,
                    source_id = %source_id,
                    "scheduler: source already ingesting, skipping this window"
                );
                DueOutcome::Skipped
            }
            Err(e) => {
                // Already recorded on the job; scheduled failures don't propagate.
                warn!(
                    job_id = %scheduled.job_id,
                    source_id = %scheduled.source_id,
                    kind = e.kind(),
                    error = %e,
                    "scheduler: scheduled ingestion failed"
                );
                DueOutcome::Failed
            }
        }
    }
}
