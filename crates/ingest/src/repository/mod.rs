//! Persistence seams used by the ingestion service.
//!
//! Sources belong to the source management service; the engine only reads
//! them, stores the backend job id on their schedule, and stamps
//! `last_ingested_at`. Jobs are owned here and written once per lifecycle
//! transition.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use biosource_core::{IngestionJob, JobStatus, Schedule, Source};

use crate::error::RepositoryError;

pub use memory::{InMemoryIngestionJobRepository, InMemorySourceRepository};
pub use postgres::{PgIngestionJobRepository, PgSourceRepository};

#[async_trait]
pub trait SourceRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Source>, RepositoryError>;

    /// Replace the source's schedule wholesale. `NotFound` if the source is gone.
    async fn update_ingestion_schedule(
        &self,
        id: Uuid,
        schedule: &Schedule,
    ) -> Result<Source, RepositoryError>;

    /// Stamp `last_ingested_at` after a successful run.
    async fn record_ingestion(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError>;

    /// Sources whose schedule needs a scheduler backend.
    async fn find_schedulable(&self) -> Result<Vec<Source>, RepositoryError>;
}

#[async_trait]
pub trait IngestionJobRepository: Send + Sync {
    /// Insert or overwrite by id. Returns the stored record.
    async fn save(&self, job: &IngestionJob) -> Result<IngestionJob, RepositoryError>;

    /// Overwrite only while the stored record is still `expected`.
    /// `None` when the record is missing or has moved to another status.
    async fn save_if_status(
        &self,
        job: &IngestionJob,
        expected: JobStatus,
    ) -> Result<Option<IngestionJob>, RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<IngestionJob>, RepositoryError>;

    /// Jobs for a source, most recently triggered first.
    async fn list_for_source(&self, source_id: Uuid) -> Result<Vec<IngestionJob>, RepositoryError>;
}
