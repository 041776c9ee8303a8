//! In-memory [`DualQueue`] — the test double for the promoter and worker pool.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use karbos_common::QueueEntry;
use tokio::sync::RwLock;

use crate::error::QueueError;
use crate::queue::{DelayedStats, DualQueue};

#[derive(Default)]
struct Inner {
    immediate: VecDeque<QueueEntry>,
    delayed: Vec<QueueEntry>,
    workers: HashMap<String, DateTime<Utc>>,
}

#[derive(Default)]
pub struct InMemoryDualQueue {
    inner: RwLock<Inner>,
}

impl InMemoryDualQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DualQueue for InMemoryDualQueue {
    async fn push_immediate(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        self.inner.write().await.immediate.push_back(entry.clone());
        Ok(())
    }

    async fn pop_immediate(&self) -> Result<Option<QueueEntry>, QueueError> {
        Ok(self.inner.write().await.immediate.pop_front())
    }

    async fn push_delayed(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        self.inner.write().await.delayed.push(entry.clone());
        Ok(())
    }

    async fn scan_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let inner = self.inner.read().await;
        let mut due: Vec<QueueEntry> = inner
            .delayed
            .iter()
            .filter(|entry| entry.scheduled_start <= now)
            .cloned()
            .collect();
        due.sort_by_key(|entry| entry.scheduled_start);
        due.truncate(limit);
        Ok(due)
    }

    async fn remove_from_delayed(&self, entry: &QueueEntry) -> Result<bool, QueueError> {
        let mut inner = self.inner.write().await;
        let before = inner.delayed.len();
        inner.delayed.retain(|candidate| candidate != entry);
        Ok(inner.delayed.len() != before)
    }

    async fn heartbeat(&self, worker_id: &str, ttl: Duration) -> Result<(), QueueError> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(1));
        self.inner
            .write()
            .await
            .workers
            .insert(worker_id.to_string(), expires_at);
        Ok(())
    }

    async fn list_live_workers(&self) -> Result<Vec<String>, QueueError> {
        let now = Utc::now();
        let inner = self.inner.read().await;
        Ok(inner
            .workers
            .iter()
            .filter(|(_, expires_at)| **expires_at > now)
            .map(|(worker_id, _)| worker_id.clone())
            .collect())
    }

    async fn immediate_depth(&self) -> Result<u64, QueueError> {
        Ok(self.inner.read().await.immediate.len() as u64)
    }

    async fn delayed_depth(&self) -> Result<u64, QueueError> {
        Ok(self.inner.read().await.delayed.len() as u64)
    }

    async fn delayed_stats(&self, now: DateTime<Utc>) -> Result<DelayedStats, QueueError> {
        let inner = self.inner.read().await;
        let total_delayed = inner.delayed.len() as u64;
        let due_now = inner
            .delayed
            .iter()
            .filter(|entry| entry.scheduled_start <= now)
            .count() as u64;
        Ok(DelayedStats {
            total_delayed,
            due_now,
            pending: total_delayed - due_now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(scheduled_start: DateTime<Utc>) -> QueueEntry {
        QueueEntry::new(Uuid::new_v4(), "alpine:latest", vec![], scheduled_start)
    }

    #[tokio::test]
    async fn immediate_lane_is_fifo_and_never_blocks_on_empty() {
        let queue = InMemoryDualQueue::new();
        assert!(queue.pop_immediate().await.unwrap().is_none());

        let e1 = entry(Utc::now());
        let e2 = entry(Utc::now());
        queue.push_immediate(&e1).await.unwrap();
        queue.push_immediate(&e2).await.unwrap();

        assert_eq!(queue.pop_immediate().await.unwrap().unwrap().job_id, e1.job_id);
        assert_eq!(queue.pop_immediate().await.unwrap().unwrap().job_id, e2.job_id);
        assert!(queue.pop_immediate().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scan_due_only_returns_entries_at_or_before_now() {
        let queue = InMemoryDualQueue::new();
        let now = Utc::now();
        let due = entry(now - chrono::Duration::minutes(5));
        let future = entry(now + chrono::Duration::hours(1));
        queue.push_delayed(&due).await.unwrap();
        queue.push_delayed(&future).await.unwrap();

        let found = queue.scan_due(now, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].job_id, due.job_id);
    }

    #[tokio::test]
    async fn scan_due_orders_by_scheduled_start_ascending_regardless_of_insertion_order() {
        let queue = InMemoryDualQueue::new();
        let now = Utc::now();
        let latest = entry(now - chrono::Duration::minutes(1));
        let earliest = entry(now - chrono::Duration::hours(2));
        let middle = entry(now - chrono::Duration::hours(1));

        // Pushed out of schedule order; scan_due must still return them ascending.
        queue.push_delayed(&latest).await.unwrap();
        queue.push_delayed(&earliest).await.unwrap();
        queue.push_delayed(&middle).await.unwrap();

        let found = queue.scan_due(now, 10).await.unwrap();
        assert_eq!(
            found.iter().map(|e| e.job_id).collect::<Vec<_>>(),
            vec![earliest.job_id, middle.job_id, latest.job_id]
        );
    }

    #[tokio::test]
    async fn scan_due_with_limit_below_due_count_keeps_the_earliest_entries() {
        let queue = InMemoryDualQueue::new();
        let now = Utc::now();
        let earliest = entry(now - chrono::Duration::hours(3));
        let middle = entry(now - chrono::Duration::hours(2));
        let latest = entry(now - chrono::Duration::hours(1));

        queue.push_delayed(&latest).await.unwrap();
        queue.push_delayed(&middle).await.unwrap();
        queue.push_delayed(&earliest).await.unwrap();

        let found = queue.scan_due(now, 2).await.unwrap();
        assert_eq!(
            found.iter().map(|e| e.job_id).collect::<Vec<_>>(),
            vec![earliest.job_id, middle.job_id]
        );
    }

    #[tokio::test]
    async fn remove_from_delayed_is_exact_match() {
        let queue = InMemoryDualQueue::new();
        let e = entry(Utc::now());
        queue.push_delayed(&e).await.unwrap();

        assert!(queue.remove_from_delayed(&e).await.unwrap());
        assert!(!queue.remove_from_delayed(&e).await.unwrap());
    }

    #[tokio::test]
    async fn delayed_stats_splits_due_from_pending() {
        let queue = InMemoryDualQueue::new();
        let now = Utc::now();
        queue
            .push_delayed(&entry(now - chrono::Duration::minutes(5)))
            .await
            .unwrap();
        queue
            .push_delayed(&entry(now + chrono::Duration::hours(1)))
            .await
            .unwrap();

        let stats = queue.delayed_stats(now).await.unwrap();
        assert_eq!(stats.total_delayed, 2);
        assert_eq!(stats.due_now, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(queue.delayed_depth().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn heartbeat_expires_after_ttl() {
        let queue = InMemoryDualQueue::new();
        queue
            .heartbeat("worker-1", Duration::from_secs(0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(queue.list_live_workers().await.unwrap().is_empty());
    }
}
