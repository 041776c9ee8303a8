//! C10 WorkerPool — concurrent consumers of the immediate lane (spec.md §4.10).
//!
//! Draining is modeled directly on `aegis-proxy/src/lifecycle.rs`'s
//! `LifecycleManager`: an `AtomicBool` flag plus an `AtomicU64` active-count, polled in
//! a loop bounded by a drain budget, generalized from "HTTP connections" to "in-flight
//! container executions." The live-set itself follows
//! `aegis-telemetry/src/ebpf/metrics.rs`'s `parking_lot::RwLock<HashMap<...>>` shape
//! for a shared, synchronously-locked map: workers register on Start and deregister on
//! Finish (spec.md §4.10 step 5, §9's "Observer-style back-pointers"). The pool never
//! holds a back-reference from a running job; the map is keyed by the job's identifier
//! only, avoiding a cyclic ownership chain through a running execution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use karbos_common::{ExecutionRecord, JobStatus, QueueEntry};
use karbos_executor::{ExecutionSpec, Executor};
use karbos_queue::DualQueue;
use karbos_store::JobStore;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::WorkerPoolConfig;

/// A fixed-size set of consumer loops that drain the immediate lane, run each job's
/// container to completion, and transition its status.
pub struct WorkerPool<S: JobStore, Q: DualQueue, E: Executor> {
    store: Arc<S>,
    queue: Arc<Q>,
    executor: Arc<E>,
    config: WorkerPoolConfig,
    worker_id: String,
    draining: AtomicBool,
    active_count: AtomicU64,
    /// In-flight work items, keyed by identifier only — never the `WorkItem` itself.
    in_flight: RwLock<HashMap<Uuid, DateTime<Utc>>>,
}

impl<S: JobStore + 'static, Q: DualQueue + 'static, E: Executor + 'static> WorkerPool<S, Q, E> {
    #[must_use]
    pub fn new(store: Arc<S>, queue: Arc<Q>, executor: Arc<E>, config: WorkerPoolConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            queue,
            executor,
            config,
            worker_id: Uuid::new_v4().to_string(),
            draining: AtomicBool::new(false),
            active_count: AtomicU64::new(0),
            in_flight: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    #[must_use]
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Identifiers of work items currently executing on this pool.
    #[must_use]
    pub fn in_flight_ids(&self) -> Vec<Uuid> {
        self.in_flight.read().keys().copied().collect()
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Spawn `config.pool_size` consumer loops plus one heartbeat loop. Callers keep
    /// the returned [`tokio::task::JoinSet`] alive and await it (or abort it) as part
    /// of process shutdown.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinSet<()> {
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..self.config.pool_size {
            let pool = Arc::clone(self);
            let cancel = cancel.clone();
            tasks.spawn(async move { pool.consumer_loop(cancel).await });
        }

        let pool = Arc::clone(self);
        tasks.spawn(async move { pool.heartbeat_loop(cancel).await });
        tasks
    }

    async fn consumer_loop(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() || self.is_draining() {
                debug!("worker consumer loop stopping");
                return;
            }

            match self.queue.pop_immediate().await {
                Ok(Some(entry)) => self.handle_entry(entry).await,
                Ok(None) => self.sleep_or_cancel(&cancel, self.config.poll_interval).await,
                Err(err) => {
                    warn!(%err, "broker unavailable, backing off before retrying");
                    self.sleep_or_cancel(&cancel, self.config.poll_interval).await;
                }
            }
        }
    }

    async fn sleep_or_cancel(&self, cancel: &CancellationToken, duration: std::time::Duration) {
        tokio::select! {
            () = cancel.cancelled() => {}
            () = tokio::time::sleep(duration) => {}
        }
    }

    /// Run one dequeued entry end to end: fetch, transition to Running, execute,
    /// record, and transition to the terminal status.
    #[instrument(skip(self, entry), fields(job_id = %entry.job_id))]
    async fn handle_entry(&self, entry: QueueEntry) {
        let job = match self.store.get(entry.job_id).await {
            Ok(job) => job,
            Err(err) => {
                debug!(%err, "spurious dequeue: work item not found, skipping");
                return;
            }
        };

        if job.status.is_terminal() {
            debug!(status = %job.status, "spurious dequeue: work item already terminal, skipping");
            return;
        }

        let from = job.status;
        if let Err(err) = self
            .store
            .update_status(job.id, from, JobStatus::Running)
            .await
        {
            debug!(%err, "status transition to Running rejected; treating as already handled");
            return;
        }

        self.active_count.fetch_add(1, Ordering::SeqCst);
        self.in_flight.write().insert(job.id, Utc::now());
        karbos_telemetry::metrics::update_worker_pool(self.active_count(), 0);

        let deadline =
            chrono::Utc::now() + ChronoDuration::from_std(self.config.job_deadline).unwrap_or_default();
        let spec = ExecutionSpec {
            job_id: job.id,
            docker_image: job.docker_image.clone(),
            argv: job.argv.clone(),
            deadline,
            cpu_fraction: self.config.cpu_fraction,
            memory_bytes: self.config.memory_bytes,
        };

        let started_at = chrono::Utc::now();
        let run_result = self.executor.run(&spec).await;

        let (exit_code, captured_output, error_message, runtime_seconds, succeeded) = match run_result
        {
            Ok(outcome) => {
                let succeeded = outcome.succeeded();
                let error_message = if succeeded {
                    None
                } else if let Some(code) = outcome.exit_code {
                    Some(format!("Container exited with code {code}"))
                } else {
                    outcome.error_message.clone()
                };
                (
                    outcome.exit_code,
                    outcome.captured_output,
                    error_message,
                    outcome.runtime_seconds,
                    succeeded,
                )
            }
            Err(err) => {
                warn!(%err, "executor failed to run container");
                (
                    None,
                    String::new(),
                    Some(err.to_string()),
                    (chrono::Utc::now() - started_at).num_seconds(),
                    false,
                )
            }
        };

        let record = ExecutionRecord {
            id: Uuid::new_v4(),
            job_id: job.id,
            started_at,
            completed_at: Some(chrono::Utc::now()),
            exit_code,
            captured_output,
            error_message,
            runtime_seconds,
            worker_node_id: self.worker_id.clone(),
        };

        if let Err(err) = self.store.record_execution(record).await {
            warn!(%err, "failed to persist execution record");
        }

        let terminal = if succeeded {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        if let Err(err) = self
            .store
            .update_status(job.id, JobStatus::Running, terminal)
            .await
        {
            warn!(%err, "failed to transition work item to terminal status");
        }

        karbos_telemetry::metrics::record_execution(
            if succeeded { "completed" } else { "failed" },
            runtime_seconds as f64,
        );

        self.in_flight.write().remove(&job.id);
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        karbos_telemetry::metrics::update_worker_pool(self.active_count(), 0);
    }

    async fn heartbeat_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_period);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("heartbeat loop stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self
                        .queue
                        .heartbeat(&self.worker_id, self.config.heartbeat_ttl)
                        .await
                    {
                        warn!(%err, "failed to refresh liveness heartbeat");
                    }
                }
            }
        }
    }

    /// Enter draining mode: no consumer loop will dequeue a new entry. Waits for the
    /// active-count to reach zero, bounded by `config.drain_budget` (spec.md §4.10);
    /// an operator's enclosing context is responsible for cancelling anything still
    /// outstanding once that budget is exceeded.
    pub async fn drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
        info!("worker pool entering drain mode");

        let start = std::time::Instant::now();
        while self.active_count() > 0 {
            if start.elapsed() > self.config.drain_budget {
                warn!(
                    active = self.active_count(),
                    "drain budget exceeded with executions still in flight"
                );
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        info!("worker pool drain complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use karbos_common::WorkItem;
    use karbos_executor::FakeExecutor;
    use karbos_queue::InMemoryDualQueue;
    use karbos_store::InMemoryJobStore;

    fn job() -> WorkItem {
        WorkItem::new(
            "alice",
            "alpine:latest",
            vec!["echo".into(), "hi".into()],
            chrono::Utc::now() + chrono::Duration::hours(1),
            chrono::Duration::minutes(10),
            "US-EAST",
            chrono::Utc::now(),
        )
    }

    #[tokio::test]
    async fn runs_a_dequeued_entry_to_completion() {
        let store = InMemoryJobStore::shared();
        let queue = Arc::new(InMemoryDualQueue::new());
        let executor = Arc::new(FakeExecutor::new());
        let pool = WorkerPool::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&executor),
            WorkerPoolConfig::default(),
        );

        let item = store.create(job()).await.unwrap();
        let entry = QueueEntry::new(item.id, &item.docker_image, item.argv.clone(), item.scheduled_start);

        pool.handle_entry(entry).await;

        let updated = store.get(item.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::Completed);
        assert_eq!(pool.active_count(), 0);

        let record = store.get_execution(item.id).await.unwrap();
        assert_eq!(record.exit_code, Some(0));
    }

    #[tokio::test]
    async fn spurious_dequeue_of_unknown_job_is_a_no_op() {
        let store = InMemoryJobStore::shared();
        let queue = Arc::new(InMemoryDualQueue::new());
        let executor = Arc::new(FakeExecutor::new());
        let pool = WorkerPool::new(store, queue, executor, WorkerPoolConfig::default());

        let entry = QueueEntry::new(Uuid::new_v4(), "alpine:latest", vec![], chrono::Utc::now());
        pool.handle_entry(entry).await;
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn second_delivery_of_an_already_terminal_job_is_a_no_op() {
        let store = InMemoryJobStore::shared();
        let queue = Arc::new(InMemoryDualQueue::new());
        let executor = Arc::new(FakeExecutor::new());
        let pool = WorkerPool::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&executor),
            WorkerPoolConfig::default(),
        );

        let item = store.create(job()).await.unwrap();
        let entry = QueueEntry::new(item.id, &item.docker_image, item.argv.clone(), item.scheduled_start);

        pool.handle_entry(entry.clone()).await;
        assert_eq!(store.get(item.id).await.unwrap().status, JobStatus::Completed);

        // Duplicate delivery (e.g. promoter double-promotion, spec.md §4.8) must not
        // re-run the container or re-transition the already-terminal job.
        pool.handle_entry(entry).await;
        assert_eq!(executor.ran_specs().await.len(), 1);
    }

    #[tokio::test]
    async fn drain_waits_for_active_executions_to_reach_zero() {
        let store = InMemoryJobStore::shared();
        let queue = Arc::new(InMemoryDualQueue::new());
        let executor = Arc::new(FakeExecutor::with_delay(std::time::Duration::from_millis(50)));
        let pool = WorkerPool::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&executor),
            WorkerPoolConfig {
                drain_budget: std::time::Duration::from_secs(5),
                ..WorkerPoolConfig::default()
            },
        );

        let item = store.create(job()).await.unwrap();
        let entry = QueueEntry::new(item.id, &item.docker_image, item.argv.clone(), item.scheduled_start);

        let pool_clone = Arc::clone(&pool);
        let handle = tokio::spawn(async move { pool_clone.handle_entry(entry).await });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(pool.active_count(), 1);

        pool.drain().await;
        handle.await.unwrap();
        assert_eq!(pool.active_count(), 0);
        assert_eq!(store.get(item.id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn in_flight_set_tracks_the_job_id_for_the_duration_of_the_run() {
        let store = InMemoryJobStore::shared();
        let queue = Arc::new(InMemoryDualQueue::new());
        let executor = Arc::new(FakeExecutor::with_delay(std::time::Duration::from_millis(50)));
        let pool = WorkerPool::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&executor),
            WorkerPoolConfig::default(),
        );

        let item = store.create(job()).await.unwrap();
        let entry = QueueEntry::new(item.id, &item.docker_image, item.argv.clone(), item.scheduled_start);

        assert!(pool.in_flight_ids().is_empty());

        let pool_clone = Arc::clone(&pool);
        let handle = tokio::spawn(async move { pool_clone.handle_entry(entry).await });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(pool.in_flight_ids(), vec![item.id]);

        handle.await.unwrap();
        assert!(pool.in_flight_ids().is_empty());
    }
}
