//! ScheduleRequest — validated input to C5 (spec.md §4.5).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use karbos_common::WorkItem;
use uuid::Uuid;

use crate::error::SchedulerError;

/// A validated request to schedule one job's container run.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub job_id: Uuid,
    pub region: String,
    pub duration: ChronoDuration,
    pub deadline: DateTime<Utc>,
    pub window_size: Option<ChronoDuration>,
    pub earliest_start: Option<DateTime<Utc>>,
}

impl ScheduleRequest {
    /// Build a request from a freshly-submitted [`WorkItem`], with no window-size or
    /// earliest-start override.
    #[must_use]
    pub fn for_job(job: &WorkItem) -> Self {
        Self {
            job_id: job.id,
            region: job.region.clone(),
            duration: job.estimated_runtime,
            deadline: job.deadline,
            window_size: None,
            earliest_start: None,
        }
    }

    /// Reject the request per spec.md §4.5: empty region; non-positive duration;
    /// deadline not in the future; earliest-start + duration > deadline.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        if self.region.trim().is_empty() {
            return Err(SchedulerError::EmptyRegion);
        }
        if self.duration <= ChronoDuration::zero() {
            return Err(SchedulerError::NonPositiveDuration(self.duration));
        }
        if self.deadline <= now {
            return Err(SchedulerError::DeadlineInPast {
                deadline: self.deadline,
                now,
            });
        }
        let earliest_start = self.earliest_start.unwrap_or(now);
        if earliest_start + self.duration > self.deadline {
            return Err(SchedulerError::NoRoomBeforeDeadline {
                earliest_start,
                deadline: self.deadline,
            });
        }
        Ok(())
    }
}
