//! C4 CarbonFetcher — cache-first composition of C1/C2/C3 (spec.md §4.4).
//!
//! Grounded on `aegis-energy/src/cache.rs`'s `get_or_fetch` (cache-first, fetch-on-miss)
//! generalized with the breaker from `breaker.rs`. The breaker itself never errors (see
//! `breaker.rs`'s header) and marks synthetic data with `provenance = "static-fallback"`;
//! this is the one place that inspects that provenance to apply spec.md's sole override
//! — preferring a stale cache entry over a static fallback.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use karbos_common::IntensitySample;
use tracing::{instrument, warn};

use crate::breaker::CircuitBreaker;
use crate::cache::IntensityCache;
use crate::provider::CarbonProvider;

/// A forecast covering `[start, end]` at this granularity is considered "good enough"
/// from cache alone once at least this fraction of expected hourly slots are present
/// and unexpired.
const RANGE_COVERAGE_THRESHOLD: f64 = 0.8;

/// Freshness window used when deciding whether a cache hit can be served without
/// calling the provider.
#[derive(Debug, Clone, Copy)]
pub struct FetcherConfig {
    pub freshness: Duration,
    pub cache_ttl: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(900),
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Composes a breaker-guarded [`CarbonProvider`] with a durable [`IntensityCache`].
pub struct CarbonFetcher<P: CarbonProvider, C: IntensityCache> {
    breaker: Arc<CircuitBreaker<P>>,
    cache: Arc<C>,
    config: FetcherConfig,
}

impl<P: CarbonProvider, C: IntensityCache> CarbonFetcher<P, C> {
    #[must_use]
    pub fn new(breaker: Arc<CircuitBreaker<P>>, cache: Arc<C>, config: FetcherConfig) -> Self {
        Self {
            breaker,
            cache,
            config,
        }
    }

    /// Single-instant carbon intensity. Never errors: a fresh cache hit, otherwise the
    /// breaker's answer — unless that answer is itself a static fallback and a stale
    /// cache entry exists, in which case the stale entry wins (spec.md §4.4 step 3, the
    /// sole case the fetcher overrides the breaker's output).
    #[instrument(skip(self))]
    pub async fn call_point(&self, region: &str, instant: DateTime<Utc>) -> IntensitySample {
        if let Ok(Some(cached)) = self.cache.lookup_nearest(region, instant).await {
            if self.cache.is_fresh(&cached, self.config.freshness) {
                return cached;
            }
        }

        let sample = self.breaker.call_point(region, instant).await;

        if sample.is_static_fallback() {
            if let Ok(Some(stale)) = self.cache.lookup_nearest(region, instant).await {
                return stale;
            }
            return sample;
        }

        let ttl = chrono::Duration::from_std(self.config.cache_ttl).unwrap_or_default();
        let mut to_store = sample.clone();
        to_store.expires_at = to_store.fetched_at + ttl;
        if let Err(err) = self.cache.upsert(&to_store, self.config.cache_ttl).await {
            warn!(%err, "failed to persist live carbon intensity sample");
        }
        sample
    }

    /// Forecast covering `[start, end]`. Never errors, and never returns a mix of live
    /// and fallback samples for the same range — a range answer is either served
    /// entirely from a sufficiently fresh cache, entirely from a fresh provider call, or
    /// entirely from fallback (with the same stale-cache-preferred override as a point
    /// query, applied per-sample only when the whole range came back synthetic).
    #[instrument(skip(self))]
    pub async fn call_range(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<IntensitySample> {
        let expected_slots = Self::expected_slot_count(start, end);

        if let Ok(cached) = self.cache.lookup_range(region, start, end).await {
            let all_fresh = cached
                .iter()
                .all(|s| self.cache.is_fresh(s, self.config.freshness));
            let coverage = if expected_slots == 0 {
                1.0
            } else {
                cached.len() as f64 / expected_slots as f64
            };
            if all_fresh && coverage >= RANGE_COVERAGE_THRESHOLD {
                return cached;
            }
        }

        let samples = self.breaker.call_range(region, start, end).await;

        let all_fallback = !samples.is_empty() && samples.iter().all(IntensitySample::is_static_fallback);
        if all_fallback {
            match self.cache.lookup_range(region, start, end).await {
                Ok(cached) if !cached.is_empty() => return cached,
                _ => return samples,
            }
        }

        if let Err(err) = self
            .cache
            .bulk_upsert(&samples, self.config.cache_ttl)
            .await
        {
            warn!(%err, "failed to persist forecast samples");
        }
        samples
    }

    fn expected_slot_count(start: DateTime<Utc>, end: DateTime<Utc>) -> usize {
        let hours = (end - start).num_hours();
        usize::try_from(hours.max(0)).unwrap_or(0) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::cache_inmemory::InMemoryIntensityCache;
    use crate::error::ProviderError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct AlwaysFailsProvider;

    #[async_trait]
    impl CarbonProvider for AlwaysFailsProvider {
        async fn current(&self, _region: &str) -> Result<IntensitySample, ProviderError> {
            Err(ProviderError::Unreachable("down".to_string()))
        }

        async fn forecast(
            &self,
            _region: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<IntensitySample>, ProviderError> {
            Err(ProviderError::Unreachable("down".to_string()))
        }

        fn provenance(&self) -> &'static str {
            "always-fails"
        }
    }

    struct ToggleProvider {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl CarbonProvider for ToggleProvider {
        async fn current(&self, region: &str) -> Result<IntensitySample, ProviderError> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(IntensitySample::new(
                    region,
                    Utc::now(),
                    150.0,
                    self.provenance(),
                    Utc::now(),
                    chrono::Duration::hours(1),
                ))
            } else {
                Err(ProviderError::Unreachable("down".to_string()))
            }
        }

        async fn forecast(
            &self,
            _region: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<IntensitySample>, ProviderError> {
            Ok(Vec::new())
        }

        fn provenance(&self) -> &'static str {
            "toggle"
        }
    }

    #[tokio::test]
    async fn falls_back_to_static_when_no_cache_and_provider_down() {
        let breaker = CircuitBreaker::wrap(AlwaysFailsProvider);
        let cache = Arc::new(InMemoryIntensityCache::new());
        let fetcher = CarbonFetcher::new(breaker, cache, FetcherConfig::default());

        let sample = fetcher.call_point("US-EAST", Utc::now()).await;
        assert!(sample.is_static_fallback());
    }

    #[tokio::test]
    async fn prefers_stale_cache_over_static_fallback() {
        let breaker = CircuitBreaker::wrap(AlwaysFailsProvider);
        let cache = Arc::new(InMemoryIntensityCache::new());
        let now = Utc::now();
        let stale = IntensitySample::new(
            "US-EAST",
            now,
            120.0,
            "live",
            now - chrono::Duration::hours(5),
            chrono::Duration::hours(1),
        );
        cache
            .upsert(&stale, Duration::from_secs(3600))
            .await
            .unwrap();

        let fetcher = CarbonFetcher::new(
            breaker,
            cache,
            FetcherConfig {
                freshness: Duration::from_secs(60),
                cache_ttl: Duration::from_secs(3600),
            },
        );

        let sample = fetcher.call_point("US-EAST", now).await;
        assert_eq!(sample.value, 120.0);
        assert!(!sample.is_static_fallback());
    }

    #[tokio::test]
    async fn fresh_cache_hit_skips_the_provider_entirely() {
        let breaker = CircuitBreaker::new(
            ToggleProvider {
                healthy: AtomicBool::new(false),
            },
            BreakerConfig::default(),
        );
        let cache = Arc::new(InMemoryIntensityCache::new());
        let now = Utc::now();
        let fresh = IntensitySample::new("US-EAST", now, 90.0, "live", now, chrono::Duration::hours(1));
        cache
            .upsert(&fresh, Duration::from_secs(3600))
            .await
            .unwrap();

        let fetcher = CarbonFetcher::new(Arc::new(breaker), cache, FetcherConfig::default());
        let sample = fetcher.call_point("US-EAST", now).await;
        assert_eq!(sample.value, 90.0);
    }

    #[tokio::test]
    async fn range_query_falls_back_to_hourly_static_samples_when_provider_and_cache_are_empty() {
        let breaker = CircuitBreaker::wrap(AlwaysFailsProvider);
        let cache = Arc::new(InMemoryIntensityCache::new());
        let fetcher = CarbonFetcher::new(breaker, cache, FetcherConfig::default());

        let now = Utc::now();
        let samples = fetcher
            .call_range("US-EAST", now, now + chrono::Duration::hours(3))
            .await;
        assert!(!samples.is_empty());
        assert!(samples.iter().all(IntensitySample::is_static_fallback));
    }
}
