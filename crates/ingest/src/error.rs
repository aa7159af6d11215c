use thiserror::Error;
use uuid::Uuid;

use biosource_core::CoreError;
use biosource_scheduler::SchedulerError;

/// Errors from source and job repositories.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("record not found: {0}")]
    NotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to decode stored record: {0}")]
    Decode(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Errors surfaced by the ingestion scheduling service.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("source not found: {0}")]
    NotFound(Uuid),

    #[error("ingestion job not found: {0}")]
    JobNotFound(Uuid),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("strategy failed ({kind}): {message}")]
    Strategy { kind: String, message: String },

    #[error("strategy timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("ingestion job {0} was cancelled")]
    Cancelled(Uuid),

    #[error("an ingestion for source {0} is already running")]
    AlreadyRunning(Uuid),

    #[error("{0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("scheduler error: {0}")]
    Scheduler(SchedulerError),
}

impl From<SchedulerError> for IngestionError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Validation(msg) => Self::Validation(msg),
            SchedulerError::Unsupported(msg) => Self::Unsupported(msg),
            other => Self::Scheduler(other),
        }
    }
}

impl From<CoreError> for IngestionError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidTransition { .. } => Self::InvalidTransition(e.to_string()),
            CoreError::InvalidConfig(msg) => Self::Configuration(msg),
            CoreError::Serialization(e) => Self::Repository(RepositoryError::Decode(e.to_string())),
        }
    }
}

impl IngestionError {
    /// Map to an HTTP status code for API responses.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) | Self::JobNotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::AlreadyRunning(_) | Self::InvalidTransition(_) | Self::Cancelled(_) => 409,
            Self::Unsupported(_) => 422,
            Self::Strategy { .. } => 502,
            Self::Timeout { .. } => 504,
            Self::Configuration(_) | Self::Repository(_) | Self::Scheduler(_) => 500,
        }
    }

    /// Short category recorded on failed jobs.
    pub fn kind(&self) -> &str {
        match self {
            Self::Strategy { kind, .. } => kind,
            Self::Timeout { .. } => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::Configuration(_) => "configuration",
            Self::Repository(_) => "repository",
            _ => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_errors_map_onto_taxonomy() {
        let e: IngestionError = SchedulerError::Unsupported("cron".into()).into();
        assert!(matches!(e, IngestionError::Unsupported(_)));
        assert_eq!(e.status_code(), 422);

        let e: IngestionError = SchedulerError::Validation("manual".into()).into();
        assert!(matches!(e, IngestionError::Validation(_)));
        assert_eq!(e.status_code(), 400);

        let e: IngestionError = SchedulerError::LockPoisoned("jobs".into()).into();
        assert!(matches!(e, IngestionError::Scheduler(_)));
        assert_eq!(e.status_code(), 500);
    }

    #[test]
    fn strategy_error_carries_kind() {
        let e = IngestionError::Strategy {
            kind: "fetch".into(),
            message: "eutils returned 429".into(),
        };
        assert_eq!(e.kind(), "fetch");
        assert_eq!(e.to_string(), "strategy failed (fetch): eutils returned 429");
        assert_eq!(IngestionError::Timeout { secs: 5 }.kind(), "timeout");
    }

    #[test]
    fn not_found_status() {
        let id = Uuid::new_v4();
        assert_eq!(IngestionError::NotFound(id).status_code(), 404);
        assert_eq!(IngestionError::JobNotFound(id).status_code(), 404);
        assert_eq!(IngestionError::AlreadyRunning(id).status_code(), 409);
    }
}
