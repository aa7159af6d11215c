use chrono::{DateTime, Utc};
use uuid::Uuid;

use biosource_core::Schedule;

use crate::error::SchedulerError;
use crate::job::ScheduledJob;

/// Registry of scheduled sources.
///
/// Calls are synchronous and take `&self`; implementations provide their own
/// interior locking so a single backend can be shared behind an `Arc`.
pub trait SchedulerBackend: Send + Sync {
    /// Register (or replace) the job for `source_id`.
    ///
    /// Reuses `schedule.backend_job_id` when present so a re-registration
    /// overwrites the previous entry.
    fn register_job(&self, source_id: Uuid, schedule: &Schedule) -> Result<ScheduledJob, SchedulerError>;

    fn get_job(&self, job_id: &str) -> Result<Option<ScheduledJob>, SchedulerError>;

    /// Remove a job. Returns whether anything was removed; unknown ids are not an error.
    fn remove_job(&self, job_id: &str) -> Result<bool, SchedulerError>;

    /// Jobs with `next_run_at <= as_of`.
    ///
    /// Each returned job's stored next run is advanced before the call
    /// returns, so the same window is never handed out twice.
    fn get_due_jobs(&self, as_of: DateTime<Utc>) -> Result<Vec<ScheduledJob>, SchedulerError>;

    fn len(&self) -> Result<usize, SchedulerError>;

    fn is_empty(&self) -> Result<bool, SchedulerError> {
        Ok(self.len()? == 0)
    }
}
