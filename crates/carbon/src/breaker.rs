//! C3 CircuitBreaker — trip/reset guard around a [`CarbonProvider`] (spec.md §4.3).
//!
//! Grounded on `knhk-workflow-engine/src/resilience/circuit_breaker.rs`'s
//! `CircuitBreaker::execute`: the same three states (`Closed`/`Open`/`HalfOpen`) behind
//! a single lock held across every read-and-maybe-transition. Unlike that teacher, this
//! breaker never lets the provider's error reach its caller (spec.md §4.3: "The breaker
//! NEVER raises the underlying provider error to its caller ... it always returns a
//! value") — on any failure path it returns the configured static fallback instead, with
//! `provenance = "static-fallback"` so the caller (`CarbonFetcher`) can tell synthetic
//! data from live data and apply its stale-cache-preferred override.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use karbos_common::IntensitySample;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::provider::CarbonProvider;

pub const STATIC_FALLBACK_PROVENANCE: &str = "static-fallback";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
    /// Carries whether a probe is currently in flight — spec.md §4.3 requires
    /// "exactly one in-flight probe" while half-open.
    HalfOpen { probe_in_flight: bool },
}

struct BreakerState {
    circuit: CircuitState,
    failures: u32,
    last_transition: DateTime<Utc>,
}

/// Configuration for when the breaker trips, probes again, and what it serves while open.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub max_failures: u32,
    pub timeout: Duration,
    pub static_fallback: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout: Duration::from_secs(30),
            static_fallback: 400.0,
        }
    }
}

/// Whether the caller may reach the provider right now, and whether this call is the
/// half-open probe (so its outcome alone decides the next transition).
enum Admission {
    Denied,
    Allowed { is_probe: bool },
}

/// Wraps any [`CarbonProvider`] with trip/reset state, generic over the provider type so
/// `CarbonFetcher` can hold one without depending on a concrete client.
pub struct CircuitBreaker<P: CarbonProvider> {
    provider: P,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl<P: CarbonProvider> CircuitBreaker<P> {
    #[must_use]
    pub fn new(provider: P, config: BreakerConfig) -> Self {
        Self {
            provider,
            config,
            state: Mutex::new(BreakerState {
                circuit: CircuitState::Closed,
                failures: 0,
                last_transition: Utc::now(),
            }),
        }
    }

    #[must_use]
    pub fn wrap(provider: P) -> Arc<Self> {
        Arc::new(Self::new(provider, BreakerConfig::default()))
    }

    /// Administrative reset, named in spec.md's prose as `Reset()`.
    #[instrument(skip(self))]
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.circuit = CircuitState::Closed;
        state.failures = 0;
        state.last_transition = Utc::now();
        info!("circuit breaker reset to closed");
    }

    #[cfg(test)]
    async fn is_open(&self) -> bool {
        matches!(self.state.lock().await.circuit, CircuitState::Open)
    }

    #[cfg(test)]
    async fn failure_count(&self) -> u32 {
        self.state.lock().await.failures
    }

    async fn admit(&self) -> Admission {
        let mut state = self.state.lock().await;
        match state.circuit {
            CircuitState::Closed => Admission::Allowed { is_probe: false },
            CircuitState::HalfOpen {
                probe_in_flight: false,
            } => {
                state.circuit = CircuitState::HalfOpen {
                    probe_in_flight: true,
                };
                Admission::Allowed { is_probe: true }
            }
            CircuitState::HalfOpen {
                probe_in_flight: true,
            } => Admission::Denied,
            CircuitState::Open => {
                let elapsed = Utc::now().signed_duration_since(state.last_transition);
                let timed_out = elapsed
                    .to_std()
                    .map(|elapsed| elapsed >= self.config.timeout)
                    .unwrap_or(false);
                if timed_out {
                    state.circuit = CircuitState::HalfOpen {
                        probe_in_flight: true,
                    };
                    state.last_transition = Utc::now();
                    Admission::Allowed { is_probe: true }
                } else {
                    Admission::Denied
                }
            }
        }
    }

    async fn record_success(&self, is_probe: bool) {
        let mut state = self.state.lock().await;
        let had_failures = state.failures > 0;
        state.failures = 0;
        match state.circuit {
            CircuitState::Closed => {
                if had_failures {
                    info!("circuit breaker failure counter reset after success");
                }
            }
            CircuitState::HalfOpen { .. } if is_probe => {
                state.circuit = CircuitState::Closed;
                state.last_transition = Utc::now();
                info!("circuit breaker closed after successful half-open probe");
            }
            _ => {}
        }
    }

    async fn record_failure(&self, is_probe: bool) {
        let mut state = self.state.lock().await;
        match state.circuit {
            CircuitState::Closed => {
                state.failures += 1;
                if state.failures >= self.config.max_failures {
                    state.circuit = CircuitState::Open;
                    state.last_transition = Utc::now();
                    warn!(failures = state.failures, "circuit breaker tripped open");
                }
            }
            CircuitState::HalfOpen { .. } if is_probe => {
                state.circuit = CircuitState::Open;
                state.last_transition = Utc::now();
                warn!("circuit breaker re-opened after half-open probe failed");
            }
            _ => {}
        }
    }

    fn fallback_point(&self, region: &str, instant: DateTime<Utc>) -> IntensitySample {
        IntensitySample::new(
            region,
            instant,
            self.config.static_fallback,
            STATIC_FALLBACK_PROVENANCE,
            Utc::now(),
            chrono::Duration::hours(1),
        )
    }

    /// Hourly static-fallback rows spanning `[start, end]`, per spec.md §4.3's "hourly
    /// samples filled over the requested range for range queries".
    fn fallback_range(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<IntensitySample> {
        let mut samples = Vec::new();
        let mut cursor = start;
        while cursor <= end {
            samples.push(self.fallback_point(region, cursor));
            cursor += chrono::Duration::hours(1);
        }
        if samples.is_empty() {
            samples.push(self.fallback_point(region, start));
        }
        samples
    }

    /// Single-instant carbon intensity, guarded by the breaker. Never errors: either the
    /// provider's live reading, or the static fallback while the circuit is open or the
    /// call itself fails.
    #[instrument(skip(self))]
    pub async fn call_point(&self, region: &str, instant: DateTime<Utc>) -> IntensitySample {
        let is_probe = match self.admit().await {
            Admission::Denied => return self.fallback_point(region, instant),
            Admission::Allowed { is_probe } => is_probe,
        };

        match self.provider.current(region).await {
            Ok(sample) => {
                self.record_success(is_probe).await;
                sample
            }
            Err(err) => {
                warn!(%err, region, "carbon provider call failed");
                self.record_failure(is_probe).await;
                self.fallback_point(region, instant)
            }
        }
    }

    /// Forecast covering `[start, end]`, guarded by the breaker. Never errors.
    #[instrument(skip(self))]
    pub async fn call_range(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<IntensitySample> {
        let is_probe = match self.admit().await {
            Admission::Denied => return self.fallback_range(region, start, end),
            Admission::Allowed { is_probe } => is_probe,
        };

        match self.provider.forecast(region, start, end).await {
            Ok(samples) => {
                self.record_success(is_probe).await;
                samples
            }
            Err(err) => {
                warn!(%err, region, "carbon forecast call failed");
                self.record_failure(is_probe).await;
                self.fallback_range(region, start, end)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        failures_remaining: AtomicU32,
    }

    #[async_trait]
    impl CarbonProvider for FlakyProvider {
        async fn current(&self, region: &str) -> Result<IntensitySample, ProviderError> {
            if self.failures_remaining.load(Ordering::SeqCst) > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(ProviderError::Unreachable("down".to_string()));
            }
            Ok(IntensitySample::new(
                region,
                Utc::now(),
                100.0,
                self.provenance(),
                Utc::now(),
                chrono::Duration::hours(1),
            ))
        }

        async fn forecast(
            &self,
            _region: &str,
            _start: chrono::DateTime<Utc>,
            _end: chrono::DateTime<Utc>,
        ) -> Result<Vec<IntensitySample>, ProviderError> {
            Ok(Vec::new())
        }

        fn provenance(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn trips_open_after_max_failures_and_returns_fallback_not_an_error() {
        let breaker = CircuitBreaker::new(
            FlakyProvider {
                failures_remaining: AtomicU32::new(10),
            },
            BreakerConfig {
                max_failures: 3,
                timeout: Duration::from_secs(60),
                static_fallback: 400.0,
            },
        );

        for _ in 0..3 {
            let sample = breaker.call_point("US-EAST", Utc::now()).await;
            assert!(sample.is_static_fallback());
        }
        assert!(breaker.is_open().await);

        // Open: no further provider calls; fallback returned without decrementing the
        // provider's own failure counter.
        let sample = breaker.call_point("US-EAST", Utc::now()).await;
        assert!(sample.is_static_fallback());
        assert_eq!(
            breaker.provider.failures_remaining.load(Ordering::SeqCst),
            7
        );
    }

    #[tokio::test]
    async fn reset_returns_to_closed_and_zeroes_failures() {
        let breaker = CircuitBreaker::new(
            FlakyProvider {
                failures_remaining: AtomicU32::new(10),
            },
            BreakerConfig {
                max_failures: 1,
                timeout: Duration::from_secs(60),
                static_fallback: 400.0,
            },
        );

        breaker.call_point("US-EAST", Utc::now()).await;
        assert!(breaker.is_open().await);

        breaker.reset().await;
        assert!(!breaker.is_open().await);
        assert_eq!(breaker.failure_count().await, 0);
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_and_zeroes_counter() {
        let breaker = CircuitBreaker::new(
            FlakyProvider {
                failures_remaining: AtomicU32::new(1),
            },
            BreakerConfig {
                max_failures: 1,
                timeout: Duration::from_millis(5),
                static_fallback: 400.0,
            },
        );

        // One failure trips it open immediately (max_failures = 1).
        let sample = breaker.call_point("US-EAST", Utc::now()).await;
        assert!(sample.is_static_fallback());
        assert!(breaker.is_open().await);

        tokio::time::sleep(Duration::from_millis(10)).await;

        // Timeout elapsed: this call is the half-open probe and the provider now
        // succeeds (failures_remaining is exhausted), so the breaker closes.
        let sample = breaker.call_point("US-EAST", Utc::now()).await;
        assert!(!sample.is_static_fallback());
        assert!(!breaker.is_open().await);
        assert_eq!(breaker.failure_count().await, 0);
    }

    #[tokio::test]
    async fn half_open_allows_exactly_one_in_flight_probe() {
        let breaker = Arc::new(CircuitBreaker::new(
            FlakyProvider {
                failures_remaining: AtomicU32::new(1),
            },
            BreakerConfig {
                max_failures: 1,
                timeout: Duration::from_millis(5),
                static_fallback: 400.0,
            },
        ));

        breaker.call_point("US-EAST", Utc::now()).await;
        assert!(breaker.is_open().await);
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Manually force half-open without resolving the probe, then verify a second
        // concurrent caller is denied rather than also reaching the provider.
        {
            let mut state = breaker.state.lock().await;
            state.circuit = CircuitState::HalfOpen {
                probe_in_flight: true,
            };
        }
        let sample = breaker.call_point("US-EAST", Utc::now()).await;
        assert!(sample.is_static_fallback());
    }
}
