//! QueueEntry — the transient record C7 (DualQueue) carries between lanes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A work item's queue-visible projection. Created by C5 or C8, consumed by C10.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: Uuid,
    pub docker_image: String,
    pub argv: Vec<String>,
    pub scheduled_start: DateTime<Utc>,
    /// Reserved; always zero in this version (spec.md §3).
    pub priority: i32,
}

impl QueueEntry {
    #[must_use]
    pub fn new(
        job_id: Uuid,
        docker_image: impl Into<String>,
        argv: Vec<String>,
        scheduled_start: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            docker_image: docker_image.into(),
            argv,
            scheduled_start,
            priority: 0,
        }
    }

    /// Serialize to the opaque blob form stored in the broker (spec.md §4.7).
    ///
    /// # Errors
    /// Returns an error if serialization fails (it cannot in practice for this type,
    /// but the broker boundary is not infallible in general).
    pub fn to_blob(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from the opaque blob form.
    ///
    /// # Errors
    /// Returns an error if the blob is not a valid serialized `QueueEntry`.
    pub fn from_blob(blob: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(blob)
    }
}
