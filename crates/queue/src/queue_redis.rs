//! Redis-backed [`DualQueue`] (spec.md §4.7).
//!
//! Grounded on the workspace's existing use of `redis::aio::ConnectionManager` for
//! worker/session state. The immediate lane is a Redis List (`RPUSH`/`LPOP`,
//! non-blocking — no `BLPOP`, since dequeue must not wait). The delayed lane is a
//! Redis Sorted Set (`ZADD` scored by epoch seconds, `ZRANGEBYSCORE -inf now LIMIT` for
//! `scan_due`, `ZREM` by exact serialized member for `remove_from_delayed`). Liveness is
//! a `SET ... EX` key per worker plus `SCAN` over the `worker:` prefix.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use karbos_common::QueueEntry;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::error::QueueError;
use crate::queue::{DelayedStats, DualQueue};

const IMMEDIATE_KEY: &str = "karbos:queue:immediate";
const DELAYED_KEY: &str = "karbos:queue:delayed";
const WORKER_KEY_PREFIX: &str = "worker:";

pub struct RedisDualQueue {
    conn: Mutex<ConnectionManager>,
}

impl RedisDualQueue {
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn worker_key(worker_id: &str) -> String {
        format!("{WORKER_KEY_PREFIX}{worker_id}")
    }
}

#[async_trait]
impl DualQueue for RedisDualQueue {
    async fn push_immediate(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        let blob = entry.to_blob()?;
        let mut conn = self.conn.lock().await;
        let _: () = conn.rpush(IMMEDIATE_KEY, blob).await?;
        Ok(())
    }

    async fn pop_immediate(&self) -> Result<Option<QueueEntry>, QueueError> {
        let mut conn = self.conn.lock().await;
        let blob: Option<String> = conn.lpop(IMMEDIATE_KEY, None).await?;
        match blob {
            Some(blob) => Ok(Some(QueueEntry::from_blob(&blob)?)),
            None => Ok(None),
        }
    }

    async fn push_delayed(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        let blob = entry.to_blob()?;
        let score = entry.scheduled_start.timestamp() as f64;
        let mut conn = self.conn.lock().await;
        let _: () = conn.zadd(DELAYED_KEY, blob, score).await?;
        Ok(())
    }

    async fn scan_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let mut conn = self.conn.lock().await;
        let blobs: Vec<String> = conn
            .zrangebyscore_limit(DELAYED_KEY, "-inf", now.timestamp(), 0, limit as isize)
            .await?;
        blobs
            .into_iter()
            .map(|blob| QueueEntry::from_blob(&blob).map_err(QueueError::from))
            .collect()
    }

    async fn remove_from_delayed(&self, entry: &QueueEntry) -> Result<bool, QueueError> {
        let blob = entry.to_blob()?;
        let mut conn = self.conn.lock().await;
        let removed: i64 = conn.zrem(DELAYED_KEY, blob).await?;
        Ok(removed > 0)
    }

    async fn heartbeat(&self, worker_id: &str, ttl: Duration) -> Result<(), QueueError> {
        let mut conn = self.conn.lock().await;
        let _: () = conn
            .set_ex(Self::worker_key(worker_id), true, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn list_live_workers(&self) -> Result<Vec<String>, QueueError> {
        let mut conn = self.conn.lock().await;
        let keys: Vec<String> = conn.keys(format!("{WORKER_KEY_PREFIX}*")).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(WORKER_KEY_PREFIX).map(str::to_string))
            .collect())
    }

    async fn immediate_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.lock().await;
        let depth: u64 = conn.llen(IMMEDIATE_KEY).await?;
        Ok(depth)
    }

    async fn delayed_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.lock().await;
        let depth: u64 = conn.zcard(DELAYED_KEY).await?;
        Ok(depth)
    }

    async fn delayed_stats(&self, now: DateTime<Utc>) -> Result<DelayedStats, QueueError> {
        let mut conn = self.conn.lock().await;
        let total_delayed: u64 = conn.zcard(DELAYED_KEY).await?;
        let due_now: u64 = conn
            .zcount(DELAYED_KEY, "-inf", now.timestamp())
            .await?;
        Ok(DelayedStats {
            total_delayed,
            due_now,
            pending: total_delayed.saturating_sub(due_now),
        })
    }
}
