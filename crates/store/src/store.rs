//! C6 JobStore — the durable lifecycle capability (spec.md §4.6, §6).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use karbos_common::{ExecutionRecord, JobStatus, WorkItem};
use uuid::Uuid;

use crate::error::StoreError;

/// Durable storage and lifecycle transition guard for [`WorkItem`]s and their
/// [`ExecutionRecord`]s.
///
/// `update_status` is a compare-and-set: the guard must hold even under concurrent
/// callers (spec.md §5), not merely a get-then-check race, so implementations commit the
/// precondition as part of the same write.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: WorkItem) -> Result<WorkItem, StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<WorkItem, StoreError>;

    /// Transition `job_id` from `from` to `to`, failing with
    /// [`StoreError::ConcurrentUpdate`] if the job's current status is not `from`, and
    /// with [`StoreError::IllegalTransition`] if `from -> to` is not in spec.md's table.
    async fn update_status(
        &self,
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<(), StoreError>;

    /// Jobs in `status`, newest first, bounded to `limit` rows (spec.md §4.6).
    async fn list_by_status(
        &self,
        status: JobStatus,
        limit: u64,
    ) -> Result<Vec<WorkItem>, StoreError>;

    /// Jobs submitted by `user`, newest first, bounded to `limit` rows.
    async fn list_by_user(&self, user: &str, limit: u64) -> Result<Vec<WorkItem>, StoreError>;

    /// All jobs, newest first, bounded to `limit` rows.
    async fn list_all(&self, limit: u64) -> Result<Vec<WorkItem>, StoreError>;

    /// Count of jobs currently in each terminal/non-terminal status, used by the
    /// ambient metrics gauges.
    async fn count_by_status(&self, status: JobStatus) -> Result<u64, StoreError>;

    async fn record_execution(&self, record: ExecutionRecord) -> Result<ExecutionRecord, StoreError>;

    async fn get_execution(&self, job_id: Uuid) -> Result<ExecutionRecord, StoreError>;

    /// Jobs in `Running` status whose `started_at` predates `older_than` — the read a
    /// reconciliation job (out of scope here) would use to find stuck executions.
    async fn list_stale_running(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<WorkItem>, StoreError>;
}
