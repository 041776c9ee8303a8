//! C8 Promoter — moves due-delayed entries into the immediate lane (spec.md §4.8).
//!
//! Grounded on `aegis-proxy/src/green_wait.rs`'s temporal-shifting tick loop, adapted
//! from a single scheduling decision into a continuously-running promotion sweep, and
//! on `lifecycle.rs`'s `tokio::select!`-over-cancellation idiom for the long-running
//! loop itself.

use std::sync::Arc;

use karbos_queue::DualQueue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::PromoterConfig;

/// The cooperative loop that drains the delayed lane into the immediate lane.
///
/// The only writer into the immediate lane besides the scheduler's initial enqueue
/// (spec.md §4.8). Never touches the store or the executor — promotion is purely a
/// queue-to-queue move.
pub struct Promoter<Q: DualQueue> {
    queue: Arc<Q>,
    config: PromoterConfig,
}

impl<Q: DualQueue> Promoter<Q> {
    #[must_use]
    pub fn new(queue: Arc<Q>, config: PromoterConfig) -> Self {
        Self { queue, config }
    }

    /// Run forever until `cancel` fires, ticking every `config.tick_interval`.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("promoter stopping on cancellation");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One promotion sweep: scan due entries, then move each one individually so a
    /// failure on one entry never blocks the rest.
    #[instrument(skip(self))]
    async fn tick(&self) {
        let now = chrono::Utc::now();
        let entries = match self.queue.scan_due(now, self.config.scan_limit).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, "promoter failed to scan due entries");
                return;
            }
        };

        if entries.is_empty() {
            return;
        }

        let mut promoted = 0u64;
        for entry in &entries {
            // Order matters (spec.md §4.8): if the enqueue fails, skip the remove so
            // the entry remains due next tick (at-least-once promotion). If enqueue
            // succeeds but remove fails, the entry may be promoted twice; the worker
            // pool's status guard tolerates the duplicate dequeue.
            if let Err(err) = self.queue.push_immediate(entry).await {
                warn!(%err, job_id = %entry.job_id, "promoter failed to enqueue immediate entry, retrying next tick");
                continue;
            }

            if let Err(err) = self.queue.remove_from_delayed(entry).await {
                warn!(%err, job_id = %entry.job_id, "promoter enqueued but failed to remove delayed entry; may double-promote");
            }
            promoted += 1;
        }

        if promoted > 0 {
            karbos_telemetry::metrics::record_promotions(promoted);
            debug!(promoted, "promoter moved delayed entries to the immediate lane");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use karbos_common::QueueEntry;
    use karbos_queue::InMemoryDualQueue;
    use uuid::Uuid;

    fn entry(scheduled_start: chrono::DateTime<chrono::Utc>) -> QueueEntry {
        QueueEntry::new(Uuid::new_v4(), "alpine:latest", vec![], scheduled_start)
    }

    #[tokio::test]
    async fn promotes_due_entries_into_the_immediate_lane() {
        let queue = Arc::new(InMemoryDualQueue::new());
        let now = chrono::Utc::now();
        let due = entry(now - chrono::Duration::minutes(1));
        let future = entry(now + chrono::Duration::hours(1));
        queue.push_delayed(&due).await.unwrap();
        queue.push_delayed(&future).await.unwrap();

        let promoter = Promoter::new(Arc::clone(&queue), PromoterConfig::default());
        promoter.tick().await;

        assert_eq!(queue.immediate_depth().await.unwrap(), 1);
        assert_eq!(queue.delayed_depth().await.unwrap(), 1);

        let promoted = queue.pop_immediate().await.unwrap().unwrap();
        assert_eq!(promoted.job_id, due.job_id);
    }

    #[tokio::test]
    async fn tick_with_nothing_due_is_a_no_op() {
        let queue = Arc::new(InMemoryDualQueue::new());
        let future = entry(chrono::Utc::now() + chrono::Duration::hours(1));
        queue.push_delayed(&future).await.unwrap();

        let promoter = Promoter::new(Arc::clone(&queue), PromoterConfig::default());
        promoter.tick().await;

        assert_eq!(queue.immediate_depth().await.unwrap(), 0);
        assert_eq!(queue.delayed_depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn run_stops_promptly_on_cancellation() {
        let queue = Arc::new(InMemoryDualQueue::new());
        let config = PromoterConfig {
            tick_interval: std::time::Duration::from_secs(3600),
            ..PromoterConfig::default()
        };
        let promoter = Promoter::new(queue, config);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let handle = tokio::spawn(async move { promoter.run(cancel_clone).await });
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("promoter should stop promptly on cancellation")
            .unwrap();
    }
}
