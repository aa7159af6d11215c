use thiserror::Error;

use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("invalid source config: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
