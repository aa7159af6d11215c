//! Process-local scheduler backend.
//!
//! Entries live in a lock-guarded map keyed by job id. Nothing is persisted:
//! after a restart the ingestion service re-registers every schedulable
//! source from the source repository.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use biosource_core::{Clock, Schedule, SystemClock};

use crate::backend::SchedulerBackend;
use crate::error::SchedulerError;
use crate::job::ScheduledJob;
use crate::policy::{next_run_after, validate};

pub struct InMemorySchedulerBackend {
    jobs: RwLock<HashMap<String, ScheduledJob>>,
    clock: Arc<dyn Clock>,
}

impl InMemorySchedulerBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// All registered jobs, ordered by next run.
    pub fn jobs(&self) -> Result<Vec<ScheduledJob>, SchedulerError> {
        let jobs = self
            .jobs
            .read()
            .map_err(|e| SchedulerError::LockPoisoned(e.to_string()))?;
        let mut all: Vec<ScheduledJob> = jobs.values().cloned().collect();
        all.sort_by(|a, b| a.next_run_at.cmp(&b.next_run_at).then_with(|| a.job_id.cmp(&b.job_id)));
        Ok(all)
    }
}

impl Default for InMemorySchedulerBackend {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl SchedulerBackend for InMemorySchedulerBackend {
    fn register_job(&self, source_id: Uuid, schedule: &Schedule) -> Result<ScheduledJob, SchedulerError> {
        validate(schedule)?;
        let next_run_at = next_run_after(schedule, self.clock.now())?;
        let job_id = schedule
            .backend_job_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let job = ScheduledJob {
            job_id: job_id.clone(),
            source_id,
            schedule: schedule.with_backend_job_id(job_id.clone()),
            next_run_at,
        };

        let mut jobs = self
            .jobs
            .write()
            .map_err(|e| SchedulerError::LockPoisoned(e.to_string()))?;
        let replaced = jobs.insert(job_id.clone(), job.clone()).is_some();

        info!(
            job_id = %job_id,
            source_id = %source_id,
            frequency = %schedule.frequency,
            next_run_at = %next_run_at,
            replaced,
            "scheduled job registered"
        );
        Ok(job)
    }

    fn get_job(&self, job_id: &str) -> Result<Option<ScheduledJob>, SchedulerError> {
        let jobs = self
            .jobs
            .read()
            .map_err(|e| SchedulerError::LockPoisoned(e.to_string()))?;
        Ok(jobs.get(job_id).cloned())
    }

    fn remove_job(&self, job_id: &str) -> Result<bool, SchedulerError> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|e| SchedulerError::LockPoisoned(e.to_string()))?;
        let removed = jobs.remove(job_id).is_some();
        if removed {
            info!(job_id = %job_id, "scheduled job removed");
        } else {
            debug!(job_id = %job_id, "remove requested for unknown scheduled job");
        }
        Ok(removed)
    }

    fn get_due_jobs(&self, as_of: DateTime<Utc>) -> Result<Vec<ScheduledJob>, SchedulerError> {
        // Selection and advance happen under one write guard so overlapping
        // pollers cannot both receive the same window.
        let mut jobs = self
            .jobs
            .write()
            .map_err(|e| SchedulerError::LockPoisoned(e.to_string()))?;

        let mut due = Vec::new();
        for job in jobs.values_mut().filter(|j| j.is_due(as_of)) {
            due.push(job.clone());
            job.next_run_at = next_run_after(&job.schedule, as_of)?;
            debug!(
                job_id = %job.job_id,
                source_id = %job.source_id,
                next_run_at = %job.next_run_at,
                "advanced scheduled job"
            );
        }
        due.sort_by(|a, b| a.next_run_at.cmp(&b.next_run_at).then_with(|| a.job_id.cmp(&b.job_id)));
        Ok(due)
    }

    fn len(&self) -> Result<usize, SchedulerError> {
        let jobs = self
            .jobs
            .read()
            .map_err(|e| SchedulerError::LockPoisoned(e.to_string()))?;
        Ok(jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biosource_core::{ManualClock, ScheduleFrequency};
    use chrono::{Duration, TimeZone};
    use std::thread;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 12, 14, 0, 0).unwrap()
    }

    fn backend() -> (InMemorySchedulerBackend, ManualClock) {
        let clock = ManualClock::new(t0());
        (InMemorySchedulerBackend::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn hourly_with_past_start_is_due_one_interval_later() {
        let (backend, _clock) = backend();
        let schedule = Schedule::every(ScheduleFrequency::Hourly).starting_at(t0() - Duration::hours(1));
        let job = backend.register_job(Uuid::new_v4(), &schedule).unwrap();
        assert_eq!(job.next_run_at, t0() + Duration::hours(1));

        assert!(backend.get_due_jobs(t0()).unwrap().is_empty());

        let due = backend.get_due_jobs(t0() + Duration::hours(1) + Duration::seconds(1)).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].job_id, job.job_id);
    }

    #[test]
    fn future_start_time_is_first_run() {
        let (backend, _clock) = backend();
        let start = t0() + Duration::minutes(20);
        let schedule = Schedule::every(ScheduleFrequency::Weekly).starting_at(start);
        let job = backend.register_job(Uuid::new_v4(), &schedule).unwrap();
        assert_eq!(job.next_run_at, start);
    }

    #[test]
    fn cron_always_rejected() {
        let (backend, _clock) = backend();
        let mut schedule = Schedule::every(ScheduleFrequency::Cron);
        schedule.cron_expression = Some("*/5 * * * *".into());
        let err = backend.register_job(Uuid::new_v4(), &schedule).unwrap_err();
        assert!(matches!(err, SchedulerError::Unsupported(_)));
        assert!(backend.is_empty().unwrap());
    }

    #[test]
    fn manual_schedule_rejected() {
        let (backend, _clock) = backend();
        let err = backend.register_job(Uuid::new_v4(), &Schedule::manual()).unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[test]
    fn due_job_returned_at_most_once_per_window() {
        let (backend, _clock) = backend();
        backend
            .register_job(Uuid::new_v4(), &Schedule::every(ScheduleFrequency::Hourly))
            .unwrap();

        let as_of = t0() + Duration::hours(1);
        let first = backend.get_due_jobs(as_of).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].next_run_at, as_of);
        assert!(backend.get_due_jobs(as_of).unwrap().is_empty());

        let stored = backend.get_job(&first[0].job_id).unwrap().unwrap();
        assert_eq!(stored.next_run_at, as_of + Duration::hours(1));
    }

    #[test]
    fn reregistering_same_id_replaces_entry() {
        let (backend, clock) = backend();
        let source_id = Uuid::new_v4();
        let job = backend
            .register_job(source_id, &Schedule::every(ScheduleFrequency::Hourly))
            .unwrap();
        assert_eq!(job.schedule.backend_job_id.as_deref(), Some(job.job_id.as_str()));

        clock.advance(Duration::minutes(10));
        let daily = Schedule::every(ScheduleFrequency::Daily).with_backend_job_id(job.job_id.clone());
        let replaced = backend.register_job(source_id, &daily).unwrap();

        assert_eq!(replaced.job_id, job.job_id);
        assert_eq!(backend.len().unwrap(), 1);
        assert_eq!(replaced.next_run_at, t0() + Duration::minutes(10) + Duration::days(1));
    }

    #[test]
    fn remove_is_idempotent() {
        let (backend, _clock) = backend();
        let job = backend
            .register_job(Uuid::new_v4(), &Schedule::every(ScheduleFrequency::Daily))
            .unwrap();
        assert!(backend.remove_job(&job.job_id).unwrap());
        assert!(!backend.remove_job(&job.job_id).unwrap());
        assert!(!backend.remove_job("never-registered").unwrap());
        assert!(backend.get_job(&job.job_id).unwrap().is_none());
    }

    #[test]
    fn concurrent_pollers_split_due_jobs() {
        let (backend, _clock) = backend();
        let backend = Arc::new(backend);
        for _ in 0..16 {
            backend
                .register_job(Uuid::new_v4(), &Schedule::every(ScheduleFrequency::Hourly))
                .unwrap();
        }

        let as_of = t0() + Duration::hours(2);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let backend = Arc::clone(&backend);
                thread::spawn(move || backend.get_due_jobs(as_of).unwrap())
            })
            .collect();

        let mut seen: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .map(|j| j.job_id)
            .collect();
        seen.sort();
        let total = seen.len();
        seen.dedup();
        assert_eq!(total, 16);
        assert_eq!(seen.len(), 16);
    }
}
