use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use biosource_core::Schedule;

/// A source registered with the scheduler backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledJob {
    /// Stable backend identifier, stored back onto the source's schedule.
    pub job_id: String,
    pub source_id: Uuid,
    /// Snapshot of the schedule at registration time.
    pub schedule: Schedule,
    pub next_run_at: DateTime<Utc>,
}

impl ScheduledJob {
    pub fn is_due(&self, as_of: DateTime<Utc>) -> bool {
        self.next_run_at <= as_of
    }
}
