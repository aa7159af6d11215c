use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid schedule: {0}")]
    Validation(String),

    #[error("unsupported schedule: {0}")]
    Unsupported(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}
