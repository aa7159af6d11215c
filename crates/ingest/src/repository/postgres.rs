//! PostgreSQL-backed repositories.
//!
//! Job maps (`metrics`, `errors`, `provenance`) and the config snapshot are
//! stored as JSONB. Enum columns hold the snake_case names used by serde.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use biosource_core::{IngestionJob, JobErrorRecord, JobStatus, Schedule, Source};

use super::{IngestionJobRepository, SourceRepository};
use crate::error::RepositoryError;

const JOB_COLUMNS: &str = "id, source_id, trigger, triggered_by, triggered_at, status, \
     started_at, completed_at, metrics, errors, provenance, source_config_snapshot, retry_of";

const SOURCE_COLUMNS: &str =
    "id, name, owner_id, source_type, config, ingestion_schedule, last_ingested_at";

// ── Rows ─────────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct IngestionJobRow {
    id: Uuid,
    source_id: Uuid,
    trigger: String,
    triggered_by: Option<Uuid>,
    triggered_at: DateTime<Utc>,
    status: String,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    metrics: serde_json::Value,
    errors: serde_json::Value,
    provenance: serde_json::Value,
    source_config_snapshot: serde_json::Value,
    retry_of: Option<Uuid>,
}

fn json_map(
    value: serde_json::Value,
    column: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, RepositoryError> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(serde_json::Map::new()),
        other => Err(RepositoryError::Decode(format!(
            "{column}: expected JSON object, got {other}"
        ))),
    }
}

impl TryFrom<IngestionJobRow> for IngestionJob {
    type Error = RepositoryError;

    fn try_from(row: IngestionJobRow) -> Result<Self, Self::Error> {
        let errors: Vec<JobErrorRecord> = serde_json::from_value(row.errors)
            .map_err(|e| RepositoryError::Decode(format!("errors: {e}")))?;
        Ok(IngestionJob {
            id: row.id,
            source_id: row.source_id,
            trigger: row
                .trigger
                .parse()
                .map_err(|e| RepositoryError::Decode(format!("trigger: {e}")))?,
            triggered_by: row.triggered_by,
            triggered_at: row.triggered_at,
            status: row
                .status
                .parse()
                .map_err(|e| RepositoryError::Decode(format!("status: {e}")))?,
            started_at: row.started_at,
            completed_at: row.completed_at,
            metrics: json_map(row.metrics, "metrics")?,
            errors,
            provenance: json_map(row.provenance, "provenance")?,
            source_config_snapshot: row.source_config_snapshot,
            retry_of: row.retry_of,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SourceRow {
    id: Uuid,
    name: String,
    owner_id: Option<Uuid>,
    source_type: String,
    config: serde_json::Value,
    ingestion_schedule: Option<serde_json::Value>,
    last_ingested_at: Option<DateTime<Utc>>,
}

impl TryFrom<SourceRow> for Source {
    type Error = RepositoryError;

    fn try_from(row: SourceRow) -> Result<Self, Self::Error> {
        let ingestion_schedule = match row.ingestion_schedule {
            Some(v) if !v.is_null() => serde_json::from_value(v)
                .map_err(|e| RepositoryError::Decode(format!("ingestion_schedule: {e}")))?,
            _ => Schedule::manual(),
        };
        Ok(Source {
            id: row.id,
            name: row.name,
            owner_id: row.owner_id,
            source_type: row
                .source_type
                .parse()
                .map_err(|e| RepositoryError::Decode(format!("source_type: {e}")))?,
            config: row.config,
            ingestion_schedule,
            last_ingested_at: row.last_ingested_at,
        })
    }
}

// ── Jobs ─────────────────────────────────────────────────────────────

/// `ingestion_jobs` table store.
#[derive(Clone)]
pub struct PgIngestionJobRepository {
    pool: PgPool,
}

impl PgIngestionJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IngestionJobRepository for PgIngestionJobRepository {
    async fn save(&self, job: &IngestionJob) -> Result<IngestionJob, RepositoryError> {
        let errors = serde_json::to_value(&job.errors)
            .map_err(|e| RepositoryError::Decode(format!("errors: {e}")))?;

        let sql = format!(
            "INSERT INTO ingestion_jobs ({JOB_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (id) DO UPDATE SET
                 status = EXCLUDED.status,
                 started_at = EXCLUDED.started_at,
                 completed_at = EXCLUDED.completed_at,
                 metrics = EXCLUDED.metrics,
                 errors = EXCLUDED.errors,
                 provenance = EXCLUDED.provenance,
                 updated_at = now()
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query_as::<_, IngestionJobRow>(&sql)
            .bind(job.id)
            .bind(job.source_id)
            .bind(job.trigger.as_str())
            .bind(job.triggered_by)
            .bind(job.triggered_at)
            .bind(job.status.as_str())
            .bind(job.started_at)
            .bind(job.completed_at)
            .bind(serde_json::Value::Object(job.metrics.clone()))
            .bind(errors)
            .bind(serde_json::Value::Object(job.provenance.clone()))
            .bind(&job.source_config_snapshot)
            .bind(job.retry_of)
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn save_if_status(
        &self,
        job: &IngestionJob,
        expected: JobStatus,
    ) -> Result<Option<IngestionJob>, RepositoryError> {
        let errors = serde_json::to_value(&job.errors)
            .map_err(|e| RepositoryError::Decode(format!("errors: {e}")))?;

        let sql = format!(
            "UPDATE ingestion_jobs SET
                 status = $2,
                 started_at = $3,
                 completed_at = $4,
                 metrics = $5,
                 errors = $6,
                 provenance = $7,
                 updated_at = now()
             WHERE id = $1 AND status = $8
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query_as::<_, IngestionJobRow>(&sql)
            .bind(job.id)
            .bind(job.status.as_str())
            .bind(job.started_at)
            .bind(job.completed_at)
            .bind(serde_json::Value::Object(job.metrics.clone()))
            .bind(errors)
            .bind(serde_json::Value::Object(job.provenance.clone()))
            .bind(expected.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(IngestionJob::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<IngestionJob>, RepositoryError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM ingestion_jobs WHERE id = $1");
        let row = sqlx::query_as::<_, IngestionJobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(IngestionJob::try_from).transpose()
    }

    async fn list_for_source(&self, source_id: Uuid) -> Result<Vec<IngestionJob>, RepositoryError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM ingestion_jobs
             WHERE source_id = $1
             ORDER BY triggered_at DESC"
        );
        let rows = sqlx::query_as::<_, IngestionJobRow>(&sql)
            .bind(source_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(IngestionJob::try_from).collect()
    }
}

// ── Sources ──────────────────────────────────────────────────────────

/// Read-mostly view over the `sources` table owned by source management.
#[derive(Clone)]
pub struct PgSourceRepository {
    pool: PgPool,
}

impl PgSourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SourceRepository for PgSourceRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Source>, RepositoryError> {
        let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = $1");
        let row = sqlx::query_as::<_, SourceRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Source::try_from).transpose()
    }

    async fn update_ingestion_schedule(
        &self,
        id: Uuid,
        schedule: &Schedule,
    ) -> Result<Source, RepositoryError> {
        let value = serde_json::to_value(schedule)
            .map_err(|e| RepositoryError::Decode(format!("ingestion_schedule: {e}")))?;
        let sql = format!(
            "UPDATE sources SET ingestion_schedule = $2, updated_at = now()
             WHERE id = $1
             RETURNING {SOURCE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SourceRow>(&sql)
            .bind(id)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or(RepositoryError::NotFound(id))?.try_into()
    }

    async fn record_ingestion(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE sources SET last_ingested_at = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    async fn find_schedulable(&self) -> Result<Vec<Source>, RepositoryError> {
        let sql = format!(
            "SELECT {SOURCE_COLUMNS} FROM sources
             WHERE (ingestion_schedule->>'enabled')::boolean IS TRUE
               AND ingestion_schedule->>'frequency' <> 'manual'
             ORDER BY name"
        );
        let rows = sqlx::query_as::<_, SourceRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Source::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biosource_core::{IngestionTrigger, ScheduleFrequency, SourceType};

    fn job_row() -> IngestionJobRow {
        IngestionJobRow {
            id: Uuid::new_v4(),
            source_id: Uuid::new_v4(),
            trigger: "scheduled".into(),
            triggered_by: None,
            triggered_at: Utc::now(),
            status: "partial".into(),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            metrics: serde_json::json!({"records_fetched": 3}),
            errors: serde_json::json!([
                {"kind": "record", "message": "missing title", "occurred_at": "2024-01-01T00:00:00Z"}
            ]),
            provenance: serde_json::Value::Null,
            source_config_snapshot: serde_json::json!({"query": "EGFR"}),
            retry_of: None,
        }
    }

    #[test]
    fn job_row_decodes() {
        let job = IngestionJob::try_from(job_row()).unwrap();
        assert_eq!(job.trigger, IngestionTrigger::Scheduled);
        assert_eq!(job.status, JobStatus::Partial);
        assert_eq!(job.metrics["records_fetched"], 3);
        assert_eq!(job.errors[0].message, "missing title");
        assert!(job.provenance.is_empty());
    }

    #[test]
    fn job_row_rejects_unknown_status() {
        let mut row = job_row();
        row.status = "exploded".into();
        assert!(matches!(IngestionJob::try_from(row), Err(RepositoryError::Decode(_))));
    }

    #[test]
    fn job_row_rejects_non_object_metrics() {
        let mut row = job_row();
        row.metrics = serde_json::json!([1, 2]);
        let err = IngestionJob::try_from(row).unwrap_err();
        assert!(err.to_string().contains("metrics"));
    }

    #[test]
    fn source_row_defaults_missing_schedule_to_manual() {
        let row = SourceRow {
            id: Uuid::new_v4(),
            name: "geo".into(),
            owner_id: None,
            source_type: "database".into(),
            config: serde_json::json!({}),
            ingestion_schedule: None,
            last_ingested_at: None,
        };
        let source = Source::try_from(row).unwrap();
        assert_eq!(source.source_type, SourceType::Database);
        assert_eq!(source.ingestion_schedule.frequency, ScheduleFrequency::Manual);
        assert!(!source.ingestion_schedule.enabled);
    }
}
