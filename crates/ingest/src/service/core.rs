use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tracing::{info, warn};
use uuid::Uuid;

use biosource_core::{Clock, SchedulerSettings};
use biosource_scheduler::{SchedulerBackend, SchedulerError};

use crate::error::IngestionError;
use crate::events::{EventBus, IngestionEvent};
use crate::repository::{IngestionJobRepository, SourceRepository};
use crate::strategy::StrategyRegistry;

/// Runtime knobs for the service.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Due jobs executed at once by `run_due_jobs`. `1` is sequential.
    pub max_concurrent_jobs: usize,
    /// Deadline for one strategy call. `None` waits indefinitely.
    pub strategy_timeout: Option<Duration>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::from(&SchedulerSettings::default())
    }
}

impl From<&SchedulerSettings> for ServiceOptions {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            max_concurrent_jobs: settings.max_concurrent_jobs.max(1),
            strategy_timeout: settings.strategy_timeout(),
        }
    }
}

/// Tally of one `run_due_jobs` sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub due: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    /// Due jobs whose source already had an execution in flight.
    pub skipped: usize,
}

/// Execution currently running for a source in this process.
pub(super) struct InFlight {
    pub(super) job_id: Option<Uuid>,
    pub(super) cancel: Arc<Notify>,
}

pub(super) type InFlightMap = Arc<Mutex<HashMap<Uuid, InFlight>>>;

fn lock_in_flight(in_flight: &InFlightMap) -> Result<MutexGuard<'_, HashMap<Uuid, InFlight>>, IngestionError> {
    in_flight
        .lock()
        .map_err(|e| IngestionError::Scheduler(SchedulerError::LockPoisoned(format!("in-flight map: {e}"))))
}

/// Holds a source's single-flight slot; released on drop.
pub(super) struct FlightGuard {
    in_flight: InFlightMap,
    source_id: Uuid,
    pub(super) cancel: Arc<Notify>,
}

impl FlightGuard {
    /// Associate the slot with the job now executing, so `cancel_job` can find it.
    pub(super) fn bind_job(&self, job_id: Uuid) -> Result<(), IngestionError> {
        let mut map = lock_in_flight(&self.in_flight)?;
        if let Some(entry) = map.get_mut(&self.source_id) {
            entry.job_id = Some(job_id);
        }
        Ok(())
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        match self.in_flight.lock() {
            Ok(mut map) => {
                map.remove(&self.source_id);
            }
            Err(e) => warn!(source_id = %self.source_id, error = %e, "in-flight map poisoned on release"),
        }
    }
}

/// Orchestrates scheduling and execution of source ingestion.
pub struct IngestionSchedulingService {
    pub(super) sources: Arc<dyn SourceRepository>,
    pub(super) jobs: Arc<dyn IngestionJobRepository>,
    pub(super) backend: Arc<dyn SchedulerBackend>,
    pub(super) strategies: StrategyRegistry,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) options: ServiceOptions,
    pub(super) events: EventBus,
    pub(super) in_flight: InFlightMap,
}

impl IngestionSchedulingService {
    pub fn new(
        sources: Arc<dyn SourceRepository>,
        jobs: Arc<dyn IngestionJobRepository>,
        backend: Arc<dyn SchedulerBackend>,
        strategies: StrategyRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!(
            strategies = ?strategies.supported_types(),
            "ingestion scheduling service created"
        );
        Self {
            sources,
            jobs,
            backend,
            strategies,
            clock,
            options: ServiceOptions::default(),
            events: EventBus::default(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_options(mut self, options: ServiceOptions) -> Self {
        self.options = ServiceOptions {
            max_concurrent_jobs: options.max_concurrent_jobs.max(1),
            ..options
        };
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Subscribe to job and schedule lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<IngestionEvent> {
        self.events.subscribe()
    }

    /// Claim the single-flight slot for `source_id`.
    pub(super) fn acquire_flight(&self, source_id: Uuid) -> Result<FlightGuard, IngestionError> {
        let mut map = lock_in_flight(&self.in_flight)?;
        if map.contains_key(&source_id) {
            return Err(IngestionError::AlreadyRunning(source_id));
        }
        let cancel = Arc::new(Notify::new());
        map.insert(
            source_id,
            InFlight {
                job_id: None,
                cancel: Arc::clone(&cancel),
            },
        );
        Ok(FlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            source_id,
            cancel,
        })
    }

    /// Cancellation handle for a job executing in this process, if any.
    pub(super) fn running_cancel_handle(&self, job_id: Uuid) -> Result<Option<Arc<Notify>>, IngestionError> {
        let map = lock_in_flight(&self.in_flight)?;
        let handle = map
            .values()
            .find(|entry| entry.job_id == Some(job_id))
            .map(|entry| Arc::clone(&entry.cancel));
        Ok(handle)
    }
}
