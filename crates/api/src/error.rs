//! Errors for the submission/inspection/forecast operations (spec.md §6, §7).

use thiserror::Error;
use uuid::Uuid;

/// Failures the four external operations can surface to their (out-of-scope) caller.
///
/// Per spec.md §7's propagation table: a submission fails only on validation, a store
/// write failure, or broker unavailability. Carbon-fetch and promoter/pool concerns
/// never surface here.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("deadline is not a valid ISO-8601 instant: {0}")]
    BadDeadlineFormat(String),

    #[error("deadline must be in the future")]
    DeadlineInPast,

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("store failure: {0}")]
    Store(#[from] karbos_store::StoreError),

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(#[from] karbos_queue::QueueError),
}

impl ApiError {
    /// The HTTP-like status code spec.md §6 assigns to this failure. The HTTP
    /// transport itself is the named out-of-scope "routing layer" collaborator; this
    /// mapping is the contract a transport would apply, not a transport.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Validation(_) | ApiError::BadDeadlineFormat(_) | ApiError::DeadlineInPast => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Store(karbos_store::StoreError::NotFound(_)) => 404,
            ApiError::Store(_) => 500,
            ApiError::BrokerUnavailable(_) => 503,
        }
    }
}
