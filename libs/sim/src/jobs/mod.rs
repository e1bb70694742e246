//! Periodic job registration
//!
//! The engine only needs to register its re-detection job; running schedules
//! is the job manager's concern.

mod manager;
mod match_candidates;

pub use manager::InProcessJobManager;
pub use match_candidates::{MatchCandidatesJob, MATCH_JOB_ID};

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use std::{sync::Arc, time::Duration};

/// A unit of scheduled work
#[async_trait]
pub trait Job: Send + Sync {
    /// Stable identifier used to detect an existing registration
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    async fn run(&self) -> Result<()>;
}

/// When a registered job fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSchedule {
    /// Once a day at a fixed UTC time
    Daily { at: NaiveTime },
    /// Repeatedly with a fixed gap
    Interval(Duration),
}

impl JobSchedule {
    pub fn daily_at_midnight() -> Self {
        JobSchedule::Daily {
            at: NaiveTime::MIN,
        }
    }

    /// The first instant strictly after `now` at which the job fires.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            JobSchedule::Daily { at } => {
                let today = Utc.from_utc_datetime(&now.date_naive().and_time(*at));
                if today > now {
                    today
                } else {
                    today + ChronoDuration::days(1)
                }
            }
            JobSchedule::Interval(gap) => {
                now + ChronoDuration::from_std(*gap).unwrap_or_else(|_| ChronoDuration::days(1))
            }
        }
    }
}

/// Registration surface of the host's job scheduler
pub trait JobManager: Send + Sync {
    fn is_registered(&self, job_id: &str) -> bool;

    fn add_job(&self, job: Arc<dyn Job>, schedule: JobSchedule) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn daily_schedule_fires_later_today_or_tomorrow() {
        let schedule = JobSchedule::Daily {
            at: NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
        };

        assert_eq!(schedule.next_run_after(at(1, 0)), at(2, 30));
        assert_eq!(
            schedule.next_run_after(at(2, 30)),
            at(2, 30) + ChronoDuration::days(1)
        );
    }

    #[test]
    fn midnight_default_rolls_to_next_day() {
        let next = JobSchedule::daily_at_midnight().next_run_after(at(12, 0));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());
    }

    #[test]
    fn interval_schedule_adds_gap() {
        let schedule = JobSchedule::Interval(Duration::from_secs(15 * 60));
        assert_eq!(schedule.next_run_after(at(9, 0)), at(9, 15));
    }
}
