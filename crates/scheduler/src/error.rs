//! Errors for the scheduling capability.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("region must not be empty")]
    EmptyRegion,

    #[error("estimated duration must be positive, got {0:?}")]
    NonPositiveDuration(chrono::Duration),

    #[error("job deadline {deadline} is already in the past relative to now {now}")]
    DeadlineInPast {
        deadline: chrono::DateTime<chrono::Utc>,
        now: chrono::DateTime<chrono::Utc>,
    },

    #[error(
        "earliest start {earliest_start} plus duration leaves no room before deadline {deadline}"
    )]
    NoRoomBeforeDeadline {
        earliest_start: chrono::DateTime<chrono::Utc>,
        deadline: chrono::DateTime<chrono::Utc>,
    },
}
