//! Configuration for the worker-role process (spec.md §5's timeout table).

use std::time::Duration;

/// Tuning for [`crate::promoter::Promoter`].
#[derive(Debug, Clone, Copy)]
pub struct PromoterConfig {
    /// How often the promoter scans the delayed lane (default 10 seconds).
    pub tick_interval: Duration,
    /// Upper bound on entries moved in a single tick.
    pub scan_limit: usize,
}

impl Default for PromoterConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            scan_limit: 256,
        }
    }
}

/// Tuning for [`crate::pool::WorkerPool`].
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    /// Number of concurrent consumer loops (default five).
    pub pool_size: usize,
    /// How long a consumer sleeps after an empty dequeue (default 2 seconds).
    pub poll_interval: Duration,
    /// Per-job execution deadline (default 10 minutes).
    pub job_deadline: Duration,
    /// How often a worker refreshes its liveness beacon (default 10 seconds).
    pub heartbeat_period: Duration,
    /// TTL stamped on each liveness beacon (default 15 seconds).
    pub heartbeat_ttl: Duration,
    /// How long `drain` waits for the active-set to reach zero before giving up
    /// (default 30 seconds; the operator's grace window per spec.md §4.10).
    pub drain_budget: Duration,
    /// Fraction of one CPU core granted to each container (default 0.5).
    pub cpu_fraction: f64,
    /// Memory ceiling per container in bytes (default 512 MiB).
    pub memory_bytes: i64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            poll_interval: Duration::from_secs(2),
            job_deadline: Duration::from_secs(600),
            heartbeat_period: Duration::from_secs(10),
            heartbeat_ttl: Duration::from_secs(15),
            drain_budget: Duration::from_secs(30),
            cpu_fraction: 0.5,
            memory_bytes: 512 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_timeout_table() {
        let promoter = PromoterConfig::default();
        assert_eq!(promoter.tick_interval, Duration::from_secs(10));

        let pool = WorkerPoolConfig::default();
        assert_eq!(pool.pool_size, 5);
        assert_eq!(pool.poll_interval, Duration::from_secs(2));
        assert_eq!(pool.job_deadline, Duration::from_secs(600));
        assert_eq!(pool.heartbeat_period, Duration::from_secs(10));
        assert_eq!(pool.heartbeat_ttl, Duration::from_secs(15));
        assert_eq!(pool.drain_budget, Duration::from_secs(30));
    }
}
