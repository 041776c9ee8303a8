//! In-memory [`JobStore`] — the test double for the worker pool and API layers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use karbos_common::{ExecutionRecord, JobStatus, WorkItem};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::JobStore;

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, WorkItem>,
    executions: HashMap<Uuid, ExecutionRecord>,
}

/// Process-local `JobStore`, one `RwLock<HashMap<...>>` per table.
#[derive(Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
}

impl InMemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: WorkItem) -> Result<WorkItem, StoreError> {
        let mut inner = self.inner.write().await;
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<WorkItem, StoreError> {
        let inner = self.inner.read().await;
        inner.jobs.get(&job_id).cloned().ok_or(StoreError::NotFound(job_id))
    }

    async fn update_status(
        &self,
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<(), StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalTransition { job_id, from, to });
        }

        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::NotFound(job_id))?;

        if job.status != from {
            return Err(StoreError::ConcurrentUpdate {
                job_id,
                expected: from,
            });
        }

        job.status = to;
        match to {
            JobStatus::Running => job.started_at = Some(Utc::now()),
            JobStatus::Completed | JobStatus::Failed => job.completed_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: JobStatus,
        limit: u64,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<WorkItem> = inner
            .jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| std::cmp::Reverse(job.created_at));
        jobs.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(jobs)
    }

    async fn list_by_user(&self, user: &str, limit: u64) -> Result<Vec<WorkItem>, StoreError> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<WorkItem> = inner
            .jobs
            .values()
            .filter(|job| job.submitter == user)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| std::cmp::Reverse(job.created_at));
        jobs.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(jobs)
    }

    async fn list_all(&self, limit: u64) -> Result<Vec<WorkItem>, StoreError> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<WorkItem> = inner.jobs.values().cloned().collect();
        jobs.sort_by_key(|job| std::cmp::Reverse(job.created_at));
        jobs.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(jobs)
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<u64, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.jobs.values().filter(|job| job.status == status).count() as u64)
    }

    async fn record_execution(
        &self,
        record: ExecutionRecord,
    ) -> Result<ExecutionRecord, StoreError> {
        let mut inner = self.inner.write().await;
        inner.executions.insert(record.job_id, record.clone());
        Ok(record)
    }

    async fn get_execution(&self, job_id: Uuid) -> Result<ExecutionRecord, StoreError> {
        let inner = self.inner.read().await;
        inner
            .executions
            .get(&job_id)
            .cloned()
            .ok_or(StoreError::ExecutionNotFound(job_id))
    }

    async fn list_stale_running(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .values()
            .filter(|job| {
                job.status == JobStatus::Running
                    && job.started_at.is_some_and(|started| started < older_than)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job() -> WorkItem {
        WorkItem::new(
            "alice",
            "alpine:latest",
            vec![],
            Utc::now() + Duration::hours(1),
            Duration::minutes(10),
            "US-EAST",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn legal_transition_succeeds_and_stamps_timestamps() {
        let store = InMemoryJobStore::new();
        let job = store.create(job()).await.unwrap();

        store
            .update_status(job.id, JobStatus::Pending, JobStatus::Running)
            .await
            .unwrap();

        let updated = store.get(job.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::Running);
        assert!(updated.started_at.is_some());
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let store = InMemoryJobStore::new();
        let job = store.create(job()).await.unwrap();

        let err = store
            .update_status(job.id, JobStatus::Pending, JobStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn concurrent_update_with_stale_expected_status_is_rejected() {
        let store = InMemoryJobStore::new();
        let job = store.create(job()).await.unwrap();

        store
            .update_status(job.id, JobStatus::Pending, JobStatus::Running)
            .await
            .unwrap();

        let err = store
            .update_status(job.id, JobStatus::Pending, JobStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConcurrentUpdate { .. }));
    }
}
