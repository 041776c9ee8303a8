//! Errors for the dual-queue capability.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("malformed queue entry: {0}")]
    Malformed(#[from] serde_json::Error),
}
