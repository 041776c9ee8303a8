//! karbos-worker: the worker-role process. Promotes due-delayed entries and runs
//! immediate-lane jobs to completion (spec.md §2, §4.8, §4.10).
//!
//! Reading `DATABASE_URL`/`REDIS_URL` and turning them into pools is the narrowest
//! possible stand-in for the out-of-scope configuration-loading collaborator; the
//! wiring itself (which store/queue/executor implementations back this process) is in
//! scope.

use std::sync::Arc;

use anyhow::Context;
use karbos_executor::BollardExecutor;
use karbos_queue::RedisDualQueue;
use karbos_store::SqlxJobStore;
use karbos_worker::{Promoter, PromoterConfig, WorkerPool, WorkerPoolConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    karbos_telemetry::init_tracing();
    let _metrics_handle = karbos_telemetry::metrics::init_metrics();

    info!("karbos-worker starting");
    info!(version = env!("CARGO_PKG_VERSION"));

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/karbos".to_string());
    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost".to_string());

    let pg_pool = sqlx::PgPool::connect(&database_url)
        .await
        .context("connecting to the job store database")?;
    let store = Arc::new(SqlxJobStore::postgres(pg_pool));
    store
        .ensure_schema()
        .await
        .context("ensuring job store schema")?;

    let redis_client = redis::Client::open(redis_url).context("parsing REDIS_URL")?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .context("connecting to the broker")?;
    let queue = Arc::new(RedisDualQueue::new(redis_conn));

    let executor = Arc::new(BollardExecutor::connect_local().context("connecting to the container runtime")?);

    let pool = WorkerPool::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        executor,
        WorkerPoolConfig::default(),
    );

    let cancel = CancellationToken::new();
    let mut tasks = pool.spawn(cancel.clone());

    let promoter = Promoter::new(Arc::clone(&queue), PromoterConfig::default());
    let promoter_cancel = cancel.clone();
    tasks.spawn(async move { promoter.run(promoter_cancel).await });

    info!(worker_id = pool.worker_id(), "worker pool running");

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");

    pool.drain().await;
    cancel.cancel();
    while tasks.join_next().await.is_some() {}

    info!("karbos-worker stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    #[allow(clippy::expect_used)]
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    #[allow(clippy::expect_used)]
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    #[allow(clippy::expect_used)]
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}
