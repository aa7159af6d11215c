//! Next-run computation shared by registration and advance-on-poll.

use chrono::{DateTime, Utc};

use biosource_core::{Schedule, ScheduleFrequency};

use crate::error::SchedulerError;

/// Check that `schedule` can be handled by an interval backend.
///
/// Cron cadences are rejected before anything else so callers get a stable
/// `Unsupported` regardless of the other fields.
pub fn validate(schedule: &Schedule) -> Result<(), SchedulerError> {
    if schedule.frequency == ScheduleFrequency::Cron {
        return Err(SchedulerError::Unsupported(
            "cron schedules need a cron-capable backend".into(),
        ));
    }
    if !schedule.requires_scheduler() {
        return Err(SchedulerError::Validation(format!(
            "schedule (enabled={}, frequency={}) does not require a scheduler",
            schedule.enabled, schedule.frequency
        )));
    }
    Ok(())
}

/// Next run for `schedule` relative to `reference`.
///
/// A `start_time` strictly after `reference` wins; otherwise the run is one
/// interval past `reference`.
pub fn next_run_after(
    schedule: &Schedule,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>, SchedulerError> {
    validate(schedule)?;
    if let Some(start) = schedule.start_time {
        if start > reference {
            return Ok(start);
        }
    }
    let interval = schedule.frequency.interval().ok_or_else(|| {
        SchedulerError::Validation(format!("frequency {} has no fixed interval", schedule.frequency))
    })?;
    Ok(reference + interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap()
    }

    #[test]
    fn future_start_time_is_used() {
        let schedule = Schedule::every(ScheduleFrequency::Daily).starting_at(t0() + Duration::minutes(5));
        assert_eq!(next_run_after(&schedule, t0()).unwrap(), t0() + Duration::minutes(5));
    }

    #[test]
    fn past_or_equal_start_time_falls_back_to_interval() {
        let past = Schedule::every(ScheduleFrequency::Hourly).starting_at(t0() - Duration::hours(1));
        assert_eq!(next_run_after(&past, t0()).unwrap(), t0() + Duration::hours(1));

        let equal = Schedule::every(ScheduleFrequency::Hourly).starting_at(t0());
        assert_eq!(next_run_after(&equal, t0()).unwrap(), t0() + Duration::hours(1));
    }

    #[test]
    fn each_frequency_adds_its_interval() {
        for (freq, expected) in [
            (ScheduleFrequency::Hourly, Duration::hours(1)),
            (ScheduleFrequency::Daily, Duration::days(1)),
            (ScheduleFrequency::Weekly, Duration::days(7)),
            (ScheduleFrequency::Monthly, Duration::days(30)),
        ] {
            let next = next_run_after(&Schedule::every(freq), t0()).unwrap();
            assert_eq!(next - t0(), expected, "{freq}");
        }
    }

    #[test]
    fn cron_is_unsupported_even_when_disabled() {
        let mut cron = Schedule::every(ScheduleFrequency::Cron);
        cron.enabled = false;
        cron.cron_expression = Some("0 3 * * *".into());
        assert!(matches!(next_run_after(&cron, t0()), Err(SchedulerError::Unsupported(_))));
    }

    #[test]
    fn manual_and_disabled_are_invalid() {
        assert!(matches!(
            next_run_after(&Schedule::manual(), t0()),
            Err(SchedulerError::Validation(_))
        ));
        let mut disabled = Schedule::every(ScheduleFrequency::Weekly);
        disabled.enabled = false;
        assert!(matches!(validate(&disabled), Err(SchedulerError::Validation(_))));
    }
}
