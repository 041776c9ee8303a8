//! karbos-api: the API-role process. Wires C1-C4 (carbon intelligence) through C5
//! (Scheduler) to C6 (JobStore) and C7 (DualQueue) behind [`karbos_api::KarbosService`].
//!
//! The HTTP routing layer a deployment fronts this with is out of scope (spec.md §1);
//! this binary runs the service and an ambient metrics-refresh loop until told to stop.
//! Reading env vars and turning them into pools/clients is the narrowest possible
//! stand-in for the out-of-scope configuration-loading collaborator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use karbos_api::KarbosService;
use karbos_carbon::{
    CarbonFetcher, CarbonProvider, CircuitBreaker, ElectricityMapsClient, FetcherConfig,
    ProviderError, SqlxIntensityCache, WattTimeClient,
};
use karbos_common::IntensitySample;
use karbos_queue::{DualQueue, RedisDualQueue};
use karbos_scheduler::SchedulerConfig;
use karbos_store::SqlxJobStore;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// How often the ambient gauges (queue depth, live workers) are refreshed.
const METRICS_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Picks between the two C1 clients at startup from env vars, so the rest of the
/// wiring holds one concrete `CarbonProvider` type regardless of which is configured.
enum AnyCarbonProvider {
    WattTime(WattTimeClient),
    ElectricityMaps(ElectricityMapsClient),
}

#[async_trait]
impl CarbonProvider for AnyCarbonProvider {
    async fn current(&self, region: &str) -> Result<IntensitySample, ProviderError> {
        match self {
            Self::WattTime(client) => client.current(region).await,
            Self::ElectricityMaps(client) => client.current(region).await,
        }
    }

    async fn forecast(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<IntensitySample>, ProviderError> {
        match self {
            Self::WattTime(client) => client.forecast(region, start, end).await,
            Self::ElectricityMaps(client) => client.forecast(region, start, end).await,
        }
    }

    fn provenance(&self) -> &'static str {
        match self {
            Self::WattTime(client) => client.provenance(),
            Self::ElectricityMaps(client) => client.provenance(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    karbos_telemetry::init_tracing();
    let _metrics_handle = karbos_telemetry::metrics::init_metrics();

    info!("karbos-api starting");
    info!(version = env!("CARGO_PKG_VERSION"));

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/karbos".to_string());
    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost".to_string());
    let default_region = std::env::var("KARBOS_DEFAULT_REGION").unwrap_or_else(|_| "US-EAST".to_string());

    let pg_pool = sqlx::PgPool::connect(&database_url)
        .await
        .context("connecting to the job store database")?;
    let store = Arc::new(SqlxJobStore::postgres(pg_pool.clone()));
    store
        .ensure_schema()
        .await
        .context("ensuring job store schema")?;

    let cache = Arc::new(SqlxIntensityCache::postgres(pg_pool));
    cache
        .ensure_schema()
        .await
        .context("ensuring carbon cache schema")?;

    let redis_client = redis::Client::open(redis_url).context("parsing REDIS_URL")?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .context("connecting to the broker")?;
    let queue = Arc::new(RedisDualQueue::new(redis_conn));

    let fetcher_config = FetcherConfig::default();

    let provider = match std::env::var("WATTTIME_USERNAME") {
        Ok(username) => {
            let password = std::env::var("WATTTIME_PASSWORD")
                .context("WATTTIME_USERNAME is set but WATTTIME_PASSWORD is not")?;
            AnyCarbonProvider::WattTime(WattTimeClient::new(username, password))
        }
        Err(_) => {
            let api_key = std::env::var("ELECTRICITYMAPS_API_KEY")
                .context("neither WATTTIME_USERNAME nor ELECTRICITYMAPS_API_KEY is set")?;
            AnyCarbonProvider::ElectricityMaps(ElectricityMapsClient::new(api_key))
        }
    };
    let breaker = CircuitBreaker::wrap(provider);
    let fetcher = Arc::new(CarbonFetcher::new(breaker, cache, fetcher_config));
    let service = KarbosService::new(
        fetcher,
        Arc::clone(&store),
        Arc::clone(&queue),
        SchedulerConfig::default(),
        default_region,
    );

    info!("karbos-api service ready");

    let cancel = CancellationToken::new();
    let metrics_cancel = cancel.clone();
    let metrics_queue = Arc::clone(&queue);
    let metrics_task = tokio::spawn(async move {
        refresh_ambient_metrics(metrics_queue, metrics_cancel).await;
    });

    let _service = service;
    wait_for_shutdown_signal().await;
    info!("shutdown signal received");

    cancel.cancel();
    let _ = metrics_task.await;

    info!("karbos-api stopped");
    Ok(())
}

/// Periodically republishes the queue-depth gauges spec.md §6's ambient metrics surface
/// names, since nothing else in this process touches the queue on a timer.
async fn refresh_ambient_metrics(queue: Arc<RedisDualQueue>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(METRICS_REFRESH_INTERVAL);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let immediate = queue.immediate_depth().await.unwrap_or(0);
                let delayed = queue.delayed_depth().await.unwrap_or(0);
                karbos_telemetry::metrics::update_queue_depths(immediate, delayed);
            }
        }
    }
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
