//! Errors for the job-store capability.

use chrono::{DateTime, Utc};
use karbos_common::JobStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("illegal transition for job {job_id}: {from} -> {to}")]
    IllegalTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {job_id} status changed concurrently, expected {expected}")]
    ConcurrentUpdate { job_id: Uuid, expected: JobStatus },

    #[error("execution record not found for job {0}")]
    ExecutionNotFound(Uuid),

    #[error("clock error: deadline {0} is not representable")]
    ClockError(DateTime<Utc>),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}
