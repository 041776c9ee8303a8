//! WorkItem and ExecutionRecord — the durable records C6 (JobStore) owns.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Default estimated runtime when a submission omits one.
pub const DEFAULT_ESTIMATED_RUNTIME_SECS: i64 = 600;

/// Lifecycle status of a [`WorkItem`].
///
/// A closed enumeration: every match over `JobStatus` in this workspace is exhaustive,
/// so an illegal status is rejected explicitly rather than falling through a wildcard
/// arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Delayed,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether `self -> next` is a legal lifecycle transition (§4.6).
    #[must_use]
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Delayed)
                | (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Delayed, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Delayed => "DELAYED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// A submitted unit of containerized work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub submitter: String,
    pub docker_image: String,
    pub argv: Vec<String>,
    pub submitted_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub estimated_runtime: Duration,
    pub region: String,
    pub scheduled_start: DateTime<Utc>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WorkItem {
    /// Construct a new item in `Pending` status, deferring id/created_at assignment
    /// rules to the store's `create` as spec.md §4.6 requires.
    #[must_use]
    pub fn new(
        submitter: impl Into<String>,
        docker_image: impl Into<String>,
        argv: Vec<String>,
        deadline: DateTime<Utc>,
        estimated_runtime: Duration,
        region: impl Into<String>,
        scheduled_start: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            submitter: submitter.into(),
            docker_image: docker_image.into(),
            argv,
            submitted_at: now,
            deadline,
            estimated_runtime,
            region: region.into(),
            scheduled_start,
            status: JobStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            metadata: HashMap::new(),
        }
    }
}

/// A terminal execution attempt of a [`WorkItem`]. Re-attempts are out of scope; this
/// is one-to-one with a job's single completed or failed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub captured_output: String,
    pub error_message: Option<String>,
    pub runtime_seconds: i64,
    pub worker_node_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_match_spec_table() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Delayed));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Delayed.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        assert!(!JobStatus::Delayed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Delayed.is_terminal());
    }

    #[test]
    fn new_work_item_starts_pending() {
        let item = WorkItem::new(
            "alice",
            "alpine:latest",
            vec![],
            Utc::now() + Duration::hours(1),
            Duration::minutes(10),
            "US-EAST",
            Utc::now(),
        );
        assert_eq!(item.status, JobStatus::Pending);
        assert!(item.metadata.is_empty());
    }
}
