//! Prometheus metrics — gauges and counters for the scheduling pipeline.
//!
//! Shaped exactly like `aegis-proxy/src/metrics.rs`: a `names` module of `&str`
//! constants, a `init_metrics() -> PrometheusHandle`, and small `record_*`/`update_*`
//! helpers. The export surface (an HTTP `/metrics` endpoint) is out of scope; these
//! recording calls are what a deployment's metrics exporter would read from.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::info;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names.
pub mod names {
    pub const CARBON_INTENSITY: &str = "karbos_carbon_intensity_g_kwh";
    pub const CARBON_FETCH_FALLBACKS_TOTAL: &str = "karbos_carbon_fetch_fallbacks_total";
    pub const BREAKER_STATE: &str = "karbos_circuit_breaker_open";
    pub const DECISIONS_TOTAL: &str = "karbos_scheduling_decisions_total";
    pub const SCHEDULED_SAVINGS_PERCENT: &str = "karbos_scheduled_savings_percent";
    pub const JOBS_BY_STATUS: &str = "karbos_jobs_by_status";
    pub const QUEUE_IMMEDIATE_DEPTH: &str = "karbos_queue_immediate_depth";
    pub const QUEUE_DELAYED_DEPTH: &str = "karbos_queue_delayed_depth";
    pub const WORKER_POOL_ACTIVE: &str = "karbos_worker_pool_active";
    pub const WORKER_LIVE_COUNT: &str = "karbos_worker_live_count";
    pub const EXECUTIONS_TOTAL: &str = "karbos_executions_total";
    pub const EXECUTION_DURATION_SECONDS: &str = "karbos_execution_duration_seconds";
    pub const PROMOTIONS_TOTAL: &str = "karbos_promotions_total";
}

/// Initialize the metrics system and describe every gauge/counter.
#[allow(clippy::expect_used)] // Panicking is acceptable during startup.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    describe_gauge!(
        names::CARBON_INTENSITY,
        "Most recently observed carbon intensity per region (gCO2eq/kWh)"
    );
    describe_counter!(
        names::CARBON_FETCH_FALLBACKS_TOTAL,
        "Total carbon-intensity fetches that returned a static fallback"
    );
    describe_gauge!(
        names::BREAKER_STATE,
        "1 when the carbon-provider circuit breaker is open, 0 otherwise"
    );
    describe_counter!(
        names::DECISIONS_TOTAL,
        "Total scheduling decisions, by kind (immediate/scheduled)"
    );
    describe_histogram!(
        names::SCHEDULED_SAVINGS_PERCENT,
        "Carbon savings percent of scheduled (non-immediate) decisions"
    );
    describe_gauge!(names::JOBS_BY_STATUS, "Current job count, by lifecycle status");
    describe_gauge!(names::QUEUE_IMMEDIATE_DEPTH, "Entries in the immediate queue lane");
    describe_gauge!(names::QUEUE_DELAYED_DEPTH, "Entries in the delayed queue lane");
    describe_gauge!(names::WORKER_POOL_ACTIVE, "In-flight executions across the worker pool");
    describe_gauge!(names::WORKER_LIVE_COUNT, "Workers with an unexpired heartbeat");
    describe_counter!(names::EXECUTIONS_TOTAL, "Total container executions, by outcome");
    describe_histogram!(names::EXECUTION_DURATION_SECONDS, "Container execution wall time");
    describe_counter!(names::PROMOTIONS_TOTAL, "Total delayed-to-immediate promotions");

    info!("metrics system initialized");
    METRICS_HANDLE.set(handle.clone()).ok();
    handle
}

/// Get the global metrics handle, if [`init_metrics`] has run.
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Record a carbon-intensity observation for `region`.
pub fn update_carbon_intensity(region: &str, value: f64) {
    gauge!(names::CARBON_INTENSITY, "region" => region.to_string()).set(value);
}

/// Record that a carbon fetch fell back to the static value.
pub fn record_carbon_fallback(region: &str) {
    counter!(names::CARBON_FETCH_FALLBACKS_TOTAL, "region" => region.to_string()).increment(1);
}

/// Update the breaker's open/closed gauge.
pub fn set_breaker_open(open: bool) {
    gauge!(names::BREAKER_STATE).set(if open { 1.0 } else { 0.0 });
}

/// Record one scheduling decision.
pub fn record_decision(kind: &str, savings_percent: f64) {
    counter!(names::DECISIONS_TOTAL, "kind" => kind.to_string()).increment(1);
    if kind == "scheduled" {
        histogram!(names::SCHEDULED_SAVINGS_PERCENT).record(savings_percent);
    }
}

/// Update the job-count gauge for one status.
pub fn update_jobs_by_status(status: &str, count: u64) {
    gauge!(names::JOBS_BY_STATUS, "status" => status.to_string()).set(count as f64);
}

/// Update the two queue-depth gauges.
pub fn update_queue_depths(immediate: u64, delayed: u64) {
    gauge!(names::QUEUE_IMMEDIATE_DEPTH).set(immediate as f64);
    gauge!(names::QUEUE_DELAYED_DEPTH).set(delayed as f64);
}

/// Update the worker-pool occupancy gauges.
pub fn update_worker_pool(active: u64, live_workers: u64) {
    gauge!(names::WORKER_POOL_ACTIVE).set(active as f64);
    gauge!(names::WORKER_LIVE_COUNT).set(live_workers as f64);
}

/// Record one container execution's outcome and duration.
pub fn record_execution(outcome: &str, duration_seconds: f64) {
    counter!(names::EXECUTIONS_TOTAL, "outcome" => outcome.to_string()).increment(1);
    histogram!(names::EXECUTION_DURATION_SECONDS).record(duration_seconds);
}

/// Record one delayed-to-immediate promotion tick's count.
pub fn record_promotions(count: u64) {
    counter!(names::PROMOTIONS_TOTAL).increment(count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_carry_the_karbos_prefix() {
        assert!(names::CARBON_INTENSITY.starts_with("karbos_"));
        assert!(names::DECISIONS_TOTAL.starts_with("karbos_"));
        assert!(names::QUEUE_IMMEDIATE_DEPTH.starts_with("karbos_"));
        assert!(names::EXECUTIONS_TOTAL.starts_with("karbos_"));
        assert!(names::PROMOTIONS_TOTAL.starts_with("karbos_"));
    }

    #[test]
    fn metric_names_are_not_empty() {
        for name in [
            names::CARBON_INTENSITY,
            names::CARBON_FETCH_FALLBACKS_TOTAL,
            names::BREAKER_STATE,
            names::DECISIONS_TOTAL,
            names::SCHEDULED_SAVINGS_PERCENT,
            names::JOBS_BY_STATUS,
            names::QUEUE_IMMEDIATE_DEPTH,
            names::QUEUE_DELAYED_DEPTH,
            names::WORKER_POOL_ACTIVE,
            names::WORKER_LIVE_COUNT,
            names::EXECUTIONS_TOTAL,
            names::EXECUTION_DURATION_SECONDS,
            names::PROMOTIONS_TOTAL,
        ] {
            assert!(!name.is_empty());
        }
    }
}
