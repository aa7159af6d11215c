use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use uuid::Uuid;

use biosource_core::{IngestionJob, IngestionSummary, IngestionTrigger, JobStatus, Source};

use crate::error::IngestionError;
use crate::events::IngestionEvent;
use crate::strategy::{error_kind, IngestionStrategy};

use super::IngestionSchedulingService;

/// How a strategy call ended.
enum StrategyOutcome {
    Finished(anyhow::Result<IngestionSummary>),
    TimedOut(Duration),
    Cancelled,
    Panicked(String),
}

impl From<Result<anyhow::Result<IngestionSummary>, JoinError>> for StrategyOutcome {
    fn from(joined: Result<anyhow::Result<IngestionSummary>, JoinError>) -> Self {
        match joined {
            Ok(result) => StrategyOutcome::Finished(result),
            Err(e) if e.is_panic() => StrategyOutcome::Panicked(panic_message(e.into_panic())),
            Err(e) => StrategyOutcome::Panicked(e.to_string()),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "strategy panicked".to_string(),
        },
    }
}

/// Extra context for one execution.
#[derive(Default)]
pub(super) struct ExecutionContext<'a> {
    pub(super) triggered_by: Option<Uuid>,
    pub(super) retry_of: Option<Uuid>,
    pub(super) scheduled_job_id: Option<&'a str>,
}

impl IngestionSchedulingService {
    /// Run `source` now, bypassing the scheduler backend.
    ///
    /// Strategy failures are returned to the caller; the job record is
    /// written either way.
    pub async fn trigger_ingestion(
        &self,
        source_id: Uuid,
        triggered_by: Option<Uuid>,
    ) -> Result<IngestionSummary, IngestionError> {
        let source = self
            .sources
            .find_by_id(source_id)
            .await?
            .ok_or(IngestionError::NotFound(source_id))?;

        info!(source_id = %source_id, trigger = "manual", "manual ingestion requested");
        self.execute(
            source,
            IngestionTrigger::Manual,
            ExecutionContext {
                triggered_by,
                ..Default::default()
            },
        )
        .await
    }

    /// Re-run the source of a failed, cancelled or partial job as a new job.
    pub async fn retry_job(
        &self,
        job_id: Uuid,
        triggered_by: Option<Uuid>,
    ) -> Result<IngestionSummary, IngestionError> {
        let previous = self
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or(IngestionError::JobNotFound(job_id))?;

        if !matches!(
            previous.status,
            JobStatus::Failed | JobStatus::Cancelled | JobStatus::Partial
        ) {
            return Err(IngestionError::InvalidTransition(format!(
                "job {} is {}; only failed, cancelled or partial jobs can be retried",
                job_id, previous.status
            )));
        }

        let source = self
            .sources
            .find_by_id(previous.source_id)
            .await?
            .ok_or(IngestionError::NotFound(previous.source_id))?;

        info!(job_id = %job_id, source_id = %source.id, trigger = "retry", "retrying ingestion job");
        self.execute(
            source,
            IngestionTrigger::Retry,
            ExecutionContext {
                triggered_by,
                retry_of: Some(job_id),
                ..Default::default()
            },
        )
        .await
    }

    /// Cancel a job.
    ///
    /// Pending jobs, and running jobs not owned by this process (left over
    /// from a crash), are moved to `Cancelled` directly, provided the stored
    /// record has not changed since it was read. A job executing here is
    /// signalled and its execution path records the cancellation; the
    /// returned record is the state at the time of the call.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<IngestionJob, IngestionError> {
        let mut job = self
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or(IngestionError::JobNotFound(job_id))?;

        if job.status.is_terminal() {
            return Err(IngestionError::InvalidTransition(format!(
                "job {} is already {}",
                job_id, job.status
            )));
        }

        if let Some(cancel) = self.running_cancel_handle(job_id)? {
            info!(job_id = %job_id, source_id = %job.source_id, "signalling running job to cancel");
            cancel.notify_one();
            return Ok(job);
        }

        let was = job.status;
        job.cancel(self.clock.now(), Some("cancelled by request"))?;
        let Some(job) = self.jobs.save_if_status(&job, was).await? else {
            // An execution finished it between the read and the write.
            let current = self
                .jobs
                .find_by_id(job_id)
                .await?
                .ok_or(IngestionError::JobNotFound(job_id))?;
            warn!(job_id = %job_id, from = %was, now = %current.status, "cancel lost race with job update");
            return Err(IngestionError::InvalidTransition(format!(
                "job {} moved from {} to {} while cancelling",
                job_id, was, current.status
            )));
        };
        info!(job_id = %job_id, source_id = %job.source_id, from = %was, "ingestion job cancelled");
        self.publish_finished(&job);
        Ok(job)
    }

    /// Jobs for a source, most recent first.
    pub async fn job_history(&self, source_id: Uuid) -> Result<Vec<IngestionJob>, IngestionError> {
        Ok(self.jobs.list_for_source(source_id).await?)
    }

    /// Shared job lifecycle: pending, running, then a terminal state.
    ///
    /// Every transition is a separate repository write, in order.
    pub(super) async fn execute(
        &self,
        source: Source,
        trigger: IngestionTrigger,
        ctx: ExecutionContext<'_>,
    ) -> Result<IngestionSummary, IngestionError> {
        let flight = self.acquire_flight(source.id)?;

        let mut job = IngestionJob::new(&source, trigger, ctx.triggered_by, self.clock.now());
        if let Some(previous) = ctx.retry_of {
            job = job.retrying(previous);
        }
        if let Some(scheduled_job_id) = ctx.scheduled_job_id {
            job = job.with_provenance("scheduled_job_id", scheduled_job_id);
        }
        // Bound before the first write so a cancel racing the pending write
        // is delivered through the signal.
        flight.bind_job(job.id)?;

        let Some(strategy) = self.strategies.get(source.source_type) else {
            let message = format!("no ingestion strategy registered for {}", source.source_type);
            self.jobs.save(&job).await?;
            job.fail(self.clock.now(), "configuration", message.clone())?;
            self.jobs.save(&job).await?;
            error!(
                job_id = %job.id,
                source_id = %source.id,
                source_type = %source.source_type,
                "ingestion job failed: no strategy"
            );
            self.publish_finished(&job);
            return Err(IngestionError::Configuration(message));
        };
        job = job.with_provenance("strategy", strategy.name());

        self.jobs.save(&job).await?;
        job.start(self.clock.now())?;
        self.jobs.save(&job).await?;

        info!(
            job_id = %job.id,
            source_id = %source.id,
            source = %source.name,
            trigger = %trigger,
            strategy = strategy.name(),
            "ingestion job started"
        );
        self.events.publish(IngestionEvent::JobStarted {
            job_id: job.id,
            source_id: source.id,
            trigger,
            at: self.clock.now(),
        });

        let outcome = self
            .run_strategy(Arc::clone(&strategy), &source, &flight.cancel)
            .await;
        let now = self.clock.now();

        let result = match outcome {
            StrategyOutcome::Finished(Ok(summary)) => {
                job.finish(now, &summary)?;
                self.jobs.save(&job).await?;
                info!(
                    job_id = %job.id,
                    source_id = %source.id,
                    status = %job.status,
                    fetched = summary.fetched,
                    created = summary.created,
                    updated = summary.updated,
                    record_errors = summary.errors.len(),
                    "ingestion job completed"
                );
                if let Err(e) = self.sources.record_ingestion(source.id, now).await {
                    warn!(
                        job_id = %job.id,
                        source_id = %source.id,
                        error = %e,
                        "failed to record last ingestion time"
                    );
                }
                Ok(summary)
            }
            StrategyOutcome::Finished(Err(e)) => {
                let kind = error_kind(&e);
                let message = format!("{e:#}");
                job.fail(now, kind, message.clone())?;
                self.jobs.save(&job).await?;
                error!(
                    job_id = %job.id,
                    source_id = %source.id,
                    kind,
                    error = %message,
                    "ingestion job failed"
                );
                Err(IngestionError::Strategy {
                    kind: kind.to_string(),
                    message,
                })
            }
            StrategyOutcome::TimedOut(limit) => {
                let secs = limit.as_secs();
                job.fail(now, "timeout", format!("strategy exceeded {secs}s deadline"))?;
                self.jobs.save(&job).await?;
                error!(job_id = %job.id, source_id = %source.id, secs, "ingestion job timed out");
                Err(IngestionError::Timeout { secs })
            }
            StrategyOutcome::Cancelled => {
                job.cancel(now, Some("cancelled while running"))?;
                self.jobs.save(&job).await?;
                warn!(job_id = %job.id, source_id = %source.id, "ingestion job cancelled while running");
                Err(IngestionError::Cancelled(job.id))
            }
            StrategyOutcome::Panicked(message) => {
                job.fail(now, "panic", message.clone())?;
                self.jobs.save(&job).await?;
                error!(job_id = %job.id, source_id = %source.id, error = %message, "ingestion strategy panicked");
                Err(IngestionError::Strategy {
                    kind: "panic".to_string(),
                    message,
                })
            }
        };

        self.publish_finished(&job);
        result
    }

    /// Strategies run on their own task so a panic fails only this job.
    async fn run_strategy(
        &self,
        strategy: Arc<dyn IngestionStrategy>,
        source: &Source,
        cancel: &Notify,
    ) -> StrategyOutcome {
        let source = source.clone();
        let mut task = tokio::spawn(async move { strategy.ingest(&source).await });

        let run = async {
            match self.options.strategy_timeout {
                Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                    Ok(joined) => StrategyOutcome::from(joined),
                    Err(_) => StrategyOutcome::TimedOut(limit),
                },
                None => StrategyOutcome::from((&mut task).await),
            }
        };

        let outcome = tokio::select! {
            outcome = run => outcome,
            _ = cancel.notified() => StrategyOutcome::Cancelled,
        };
        // No-op when the task already finished.
        task.abort();
        outcome
    }

    fn publish_finished(&self, job: &IngestionJob) {
        self.events.publish(IngestionEvent::JobFinished {
            job_id: job.id,
            source_id: job.source_id,
            status: job.status,
            duration_ms: job.duration().map(|d| d.num_milliseconds()),
            at: self.clock.now(),
        });
    }
}
