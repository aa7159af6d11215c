//! Durable record of one ingestion attempt.
//!
//! An [`IngestionJob`] moves strictly forward through its lifecycle:
//!
//! ```text
//! Pending ──start──▶ Running ──finish────▶ Completed | Partial
//!    │                  │──fail──────────▶ Failed
//!    │                  └──cancel────────▶ Cancelled
//!    ├──fail (could not start) ─────────▶ Failed
//!    └──cancel ─────────────────────────▶ Cancelled
//! ```
//!
//! Terminal jobs are never mutated again; a retry is a new job with
//! [`IngestionTrigger::Retry`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::source::Source;
use crate::summary::IngestionSummary;

/// What caused a job to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionTrigger {
    Manual,
    Scheduled,
    Api,
    Webhook,
    Retry,
}

impl IngestionTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Api => "api",
            Self::Webhook => "webhook",
            Self::Retry => "retry",
        }
    }
}

impl fmt::Display for IngestionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestionTrigger {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "scheduled" => Ok(Self::Scheduled),
            "api" => Ok(Self::Api),
            "webhook" => Ok(Self::Webhook),
            "retry" => Ok(Self::Retry),
            other => Err(CoreError::InvalidConfig(format!("unknown trigger '{other}'"))),
        }
    }
}

/// Lifecycle state of an ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    /// Finished, but the strategy reported record-level errors.
    Partial,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Partial => "partial",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled | Self::Partial)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running | Failed | Cancelled)
                | (Running, Completed | Failed | Partial | Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "partial" => Ok(Self::Partial),
            other => Err(CoreError::InvalidConfig(format!("unknown job status '{other}'"))),
        }
    }
}

/// Structured error captured on a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobErrorRecord {
    /// Short machine-readable category (`strategy`, `timeout`, `configuration`, ...).
    pub kind: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// One execution attempt of a source's ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: Uuid,
    pub source_id: Uuid,
    pub trigger: IngestionTrigger,
    pub triggered_by: Option<Uuid>,
    pub triggered_at: DateTime<Utc>,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metrics: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub errors: Vec<JobErrorRecord>,
    #[serde(default)]
    pub provenance: serde_json::Map<String, serde_json::Value>,
    /// Frozen copy of the source configuration at trigger time.
    #[serde(default)]
    pub source_config_snapshot: serde_json::Value,
    /// Job this one retries, if any.
    #[serde(default)]
    pub retry_of: Option<Uuid>,
}

impl IngestionJob {
    /// Create a pending job for `source`, snapshotting its configuration.
    pub fn new(
        source: &Source,
        trigger: IngestionTrigger,
        triggered_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut provenance = serde_json::Map::new();
        provenance.insert("source_name".into(), source.name.clone().into());
        provenance.insert("source_type".into(), source.source_type.as_str().into());
        provenance.insert("trigger".into(), trigger.as_str().into());

        Self {
            id: Uuid::new_v4(),
            source_id: source.id,
            trigger,
            triggered_by,
            triggered_at: now,
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            metrics: serde_json::Map::new(),
            errors: Vec::new(),
            provenance,
            source_config_snapshot: source.config.clone(),
            retry_of: None,
        }
    }

    pub fn with_provenance(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.provenance.insert(key.to_string(), value.into());
        self
    }

    pub fn retrying(mut self, previous: Uuid) -> Self {
        self.retry_of = Some(previous);
        self.with_provenance("retry_of", previous.to_string())
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(to) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// `Pending -> Running`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Close a running job from a strategy summary: `Partial` when the
    /// summary carries record errors, `Completed` otherwise.
    pub fn finish(&mut self, now: DateTime<Utc>, summary: &IngestionSummary) -> Result<(), CoreError> {
        if summary.is_partial() {
            self.complete_partial(now, summary)
        } else {
            self.complete(now, summary)
        }
    }

    /// `Running -> Completed`.
    pub fn complete(&mut self, now: DateTime<Utc>, summary: &IngestionSummary) -> Result<(), CoreError> {
        self.transition(JobStatus::Completed)?;
        self.close_with(now, summary);
        Ok(())
    }

    /// `Running -> Partial`.
    pub fn complete_partial(&mut self, now: DateTime<Utc>, summary: &IngestionSummary) -> Result<(), CoreError> {
        self.transition(JobStatus::Partial)?;
        self.close_with(now, summary);
        Ok(())
    }

    fn close_with(&mut self, now: DateTime<Utc>, summary: &IngestionSummary) {
        self.completed_at = Some(now);
        self.metrics.extend(summary.to_metrics());
        for message in &summary.errors {
            self.errors.push(JobErrorRecord {
                kind: "record".into(),
                message: message.clone(),
                occurred_at: now,
            });
        }
    }

    /// Move to `Failed`, recording the cause.
    pub fn fail(&mut self, now: DateTime<Utc>, kind: &str, message: impl Into<String>) -> Result<(), CoreError> {
        self.transition(JobStatus::Failed)?;
        self.completed_at = Some(now);
        self.errors.push(JobErrorRecord {
            kind: kind.to_string(),
            message: message.into(),
            occurred_at: now,
        });
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>, reason: Option<&str>) -> Result<(), CoreError> {
        self.transition(JobStatus::Cancelled)?;
        self.completed_at = Some(now);
        if let Some(reason) = reason {
            self.errors.push(JobErrorRecord {
                kind: "cancelled".into(),
                message: reason.to_string(),
                occurred_at: now,
            });
        }
        Ok(())
    }

    /// Wall time between start and completion, when both are known.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
