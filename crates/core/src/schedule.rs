//! Declarative ingestion cadence attached to a source.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

fn default_timezone() -> String {
    "UTC".to_string()
}

/// How often a source should be ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleFrequency {
    /// Only runs when triggered by a user.
    Manual,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    /// Driven by `cron_expression`; needs a cron-capable backend.
    Cron,
}

impl ScheduleFrequency {
    /// Fixed scheduling unit. `None` for manual and cron cadences.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Hourly => Some(Duration::hours(1)),
            Self::Daily => Some(Duration::days(1)),
            Self::Weekly => Some(Duration::days(7)),
            Self::Monthly => Some(Duration::days(30)),
            Self::Manual | Self::Cron => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Cron => "cron",
        }
    }
}

impl fmt::Display for ScheduleFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ingestion policy for a source.
///
/// Treated as an immutable value: updates replace the whole schedule
/// (see [`Schedule::with_backend_job_id`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub enabled: bool,
    pub frequency: ScheduleFrequency,
    /// First run instant. Ignored once it lies in the past.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// IANA timezone name.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub cron_expression: Option<String>,
    /// Identifier assigned by the scheduler backend, reused on reschedule.
    #[serde(default)]
    pub backend_job_id: Option<String>,
}

impl Schedule {
    /// A disabled, manual-only schedule.
    pub fn manual() -> Self {
        Self {
            enabled: false,
            frequency: ScheduleFrequency::Manual,
            start_time: None,
            timezone: default_timezone(),
            cron_expression: None,
            backend_job_id: None,
        }
    }

    /// An enabled schedule with the given frequency and no start time.
    pub fn every(frequency: ScheduleFrequency) -> Self {
        Self {
            enabled: true,
            frequency,
            ..Self::manual()
        }
    }

    pub fn starting_at(self, start_time: DateTime<Utc>) -> Self {
        Self {
            start_time: Some(start_time),
            ..self
        }
    }

    /// Whether this schedule must be registered with a scheduler backend.
    pub fn requires_scheduler(&self) -> bool {
        self.enabled && self.frequency != ScheduleFrequency::Manual
    }

    /// Copy of this schedule bound to a backend job id.
    pub fn with_backend_job_id(&self, job_id: impl Into<String>) -> Self {
        Self {
            backend_job_id: Some(job_id.into()),
            ..self.clone()
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::manual()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_scheduler_truth_table() {
        assert!(!Schedule::manual().requires_scheduler());
        assert!(Schedule::every(ScheduleFrequency::Hourly).requires_scheduler());
        assert!(Schedule::every(ScheduleFrequency::Cron).requires_scheduler());

        let mut disabled = Schedule::every(ScheduleFrequency::Daily);
        disabled.enabled = false;
        assert!(!disabled.requires_scheduler());

        // Enabled but manual never needs a scheduler.
        let mut enabled_manual = Schedule::manual();
        enabled_manual.enabled = true;
        assert!(!enabled_manual.requires_scheduler());
    }

    #[test]
    fn intervals() {
        assert_eq!(ScheduleFrequency::Hourly.interval(), Some(Duration::hours(1)));
        assert_eq!(ScheduleFrequency::Daily.interval(), Some(Duration::hours(24)));
        assert_eq!(ScheduleFrequency::Weekly.interval(), Some(Duration::days(7)));
        assert_eq!(ScheduleFrequency::Monthly.interval(), Some(Duration::days(30)));
        assert_eq!(ScheduleFrequency::Manual.interval(), None);
        assert_eq!(ScheduleFrequency::Cron.interval(), None);
    }

    #[test]
    fn with_backend_job_id_leaves_original_untouched() {
        let original = Schedule::every(ScheduleFrequency::Weekly);
        let bound = original.with_backend_job_id("job-1");
        assert_eq!(bound.backend_job_id.as_deref(), Some("job-1"));
        assert!(original.backend_job_id.is_none());
        assert_eq!(bound.frequency, original.frequency);
    }

    #[test]
    fn schedule_defaults_from_json() {
        let json = r#"{"enabled":true,"frequency":"daily"}"#;
        let schedule: Schedule = serde_json::from_str(json).unwrap();
        assert_eq!(schedule.frequency, ScheduleFrequency::Daily);
        assert_eq!(schedule.timezone, "UTC");
        assert!(schedule.start_time.is_none());
        assert!(schedule.backend_job_id.is_none());
    }
}
