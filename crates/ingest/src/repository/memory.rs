use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use uuid::Uuid;

use biosource_core::{IngestionJob, JobStatus, Schedule, Source};

use super::{IngestionJobRepository, SourceRepository};
use crate::error::RepositoryError;

fn poisoned<E: std::fmt::Display>(what: &str) -> impl FnOnce(E) -> RepositoryError + '_ {
    move |e| RepositoryError::LockPoisoned(format!("{what}: {e}"))
}

// ── Sources ──────────────────────────────────────────────────────────

/// Source store for tests and single-process deployments.
#[derive(Default)]
pub struct InMemorySourceRepository {
    sources: RwLock<HashMap<Uuid, Source>>,
    ingestions_recorded: RwLock<Vec<(Uuid, DateTime<Utc>)>>,
}

impl InMemorySourceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, source: Source) -> Result<(), RepositoryError> {
        let mut sources = self.sources.write().map_err(poisoned("sources"))?;
        sources.insert(source.id, source);
        Ok(())
    }

    pub fn remove(&self, id: Uuid) -> Result<Option<Source>, RepositoryError> {
        let mut sources = self.sources.write().map_err(poisoned("sources"))?;
        Ok(sources.remove(&id))
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Source>, RepositoryError> {
        let sources = self.sources.read().map_err(poisoned("sources"))?;
        Ok(sources.get(&id).cloned())
    }

    /// Every `record_ingestion` call, in order.
    pub fn ingestions_recorded(&self) -> Result<Vec<(Uuid, DateTime<Utc>)>, RepositoryError> {
        let recorded = self.ingestions_recorded.read().map_err(poisoned("ingestions"))?;
        Ok(recorded.clone())
    }
}

#[async_trait]
impl SourceRepository for InMemorySourceRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Source>, RepositoryError> {
        self.get(id)
    }

    async fn update_ingestion_schedule(
        &self,
        id: Uuid,
        schedule: &Schedule,
    ) -> Result<Source, RepositoryError> {
        let mut sources = self.sources.write().map_err(poisoned("sources"))?;
        let source = sources.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        source.ingestion_schedule = schedule.clone();
        Ok(source.clone())
    }

    async fn record_ingestion(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        {
            let mut sources = self.sources.write().map_err(poisoned("sources"))?;
            let source = sources.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
            source.last_ingested_at = Some(at);
        }
        self.ingestions_recorded
            .write()
            .map_err(poisoned("ingestions"))?
            .push((id, at));
        Ok(())
    }

    async fn find_schedulable(&self) -> Result<Vec<Source>, RepositoryError> {
        let sources = self.sources.read().map_err(poisoned("sources"))?;
        let mut schedulable: Vec<Source> = sources
            .values()
            .filter(|s| s.ingestion_schedule.requires_scheduler())
            .cloned()
            .collect();
        schedulable.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(schedulable)
    }
}

// ── Jobs ─────────────────────────────────────────────────────────────

/// Job store keeping every write in an append-only log, so callers can
/// inspect the exact sequence of lifecycle transitions.
#[derive(Default)]
pub struct InMemoryIngestionJobRepository {
    jobs: RwLock<IndexMap<Uuid, IngestionJob>>,
    writes: RwLock<Vec<IngestionJob>>,
}

impl InMemoryIngestionJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every saved snapshot, oldest first.
    pub fn writes(&self) -> Result<Vec<IngestionJob>, RepositoryError> {
        let writes = self.writes.read().map_err(poisoned("job writes"))?;
        Ok(writes.clone())
    }

    /// Status sequence written for one job.
    pub fn status_history(&self, job_id: Uuid) -> Result<Vec<JobStatus>, RepositoryError> {
        let writes = self.writes.read().map_err(poisoned("job writes"))?;
        Ok(writes
            .iter()
            .filter(|j| j.id == job_id)
            .map(|j| j.status)
            .collect())
    }

    pub fn len(&self) -> Result<usize, RepositoryError> {
        let jobs = self.jobs.read().map_err(poisoned("jobs"))?;
        Ok(jobs.len())
    }

    pub fn is_empty(&self) -> Result<bool, RepositoryError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl IngestionJobRepository for InMemoryIngestionJobRepository {
    async fn save(&self, job: &IngestionJob) -> Result<IngestionJob, RepositoryError> {
        {
            let mut jobs = self.jobs.write().map_err(poisoned("jobs"))?;
            jobs.insert(job.id, job.clone());
        }
        self.writes
            .write()
            .map_err(poisoned("job writes"))?
            .push(job.clone());
        Ok(job.clone())
    }

    async fn save_if_status(
        &self,
        job: &IngestionJob,
        expected: JobStatus,
    ) -> Result<Option<IngestionJob>, RepositoryError> {
        let mut jobs = self.jobs.write().map_err(poisoned("jobs"))?;
        match jobs.get(&job.id) {
            Some(stored) if stored.status == expected => {}
            _ => return Ok(None),
        }
        jobs.insert(job.id, job.clone());
        // Log while still holding the map so the write order matches.
        self.writes
            .write()
            .map_err(poisoned("job writes"))?
            .push(job.clone());
        Ok(Some(job.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<IngestionJob>, RepositoryError> {
        let jobs = self.jobs.read().map_err(poisoned("jobs"))?;
        Ok(jobs.get(&id).cloned())
    }

    async fn list_for_source(&self, source_id: Uuid) -> Result<Vec<IngestionJob>, RepositoryError> {
        let jobs = self.jobs.read().map_err(poisoned("jobs"))?;
        // Insertion order is trigger order; newest first.
        Ok(jobs
            .values()
            .rev()
            .filter(|j| j.source_id == source_id)
            .cloned()
            .collect())
    }
}
