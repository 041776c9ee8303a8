//! C7 DualQueue — the immediate/delayed lane capability (spec.md §4.7).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use karbos_common::QueueEntry;

use crate::error::QueueError;

/// Snapshot of the delayed lane's occupancy, per spec.md §4.7's observability surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayedStats {
    /// Total entries currently in the delayed lane.
    pub total_delayed: u64,
    /// Entries whose `scheduled_start` is already at or before now.
    pub due_now: u64,
    /// Entries still waiting for their `scheduled_start`.
    pub pending: u64,
}

/// Dual-lane job queue plus worker liveness registry.
///
/// Dequeue from the immediate lane must never block (`pop_immediate` returns `None`
/// on empty rather than waiting), matching spec.md §4.7's requirement that a worker
/// never stalls behind an empty queue.
#[async_trait]
pub trait DualQueue: Send + Sync {
    async fn push_immediate(&self, entry: &QueueEntry) -> Result<(), QueueError>;

    async fn pop_immediate(&self) -> Result<Option<QueueEntry>, QueueError>;

    async fn push_delayed(&self, entry: &QueueEntry) -> Result<(), QueueError>;

    /// Entries in the delayed lane whose `scheduled_start` is at or before `now`,
    /// bounded to at most `limit` entries per call.
    async fn scan_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueueEntry>, QueueError>;

    /// Remove `entry` from the delayed lane by exact member match, not a scan over all
    /// entries, per spec.md's "implementations MUST bound this scan." Returns whether
    /// it was present.
    async fn remove_from_delayed(&self, entry: &QueueEntry) -> Result<bool, QueueError>;

    /// Record that `worker_id` is alive, expiring automatically after `ttl`.
    async fn heartbeat(&self, worker_id: &str, ttl: Duration) -> Result<(), QueueError>;

    /// Worker ids with an unexpired heartbeat.
    async fn list_live_workers(&self) -> Result<Vec<String>, QueueError>;

    /// Number of entries currently sitting in the immediate lane.
    async fn immediate_depth(&self) -> Result<u64, QueueError>;

    /// Number of entries currently sitting in the delayed lane.
    async fn delayed_depth(&self) -> Result<u64, QueueError>;

    /// Delayed-lane occupancy split into due-now versus still-pending, relative to
    /// `now`.
    async fn delayed_stats(&self, now: DateTime<Utc>) -> Result<DelayedStats, QueueError>;
}
