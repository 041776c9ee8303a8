//! In-memory `IntensityCache` — the fast-path test double (spec.md §4.2, supplemented).
//!
//! Grounded on `aegis-energy/src/cache.rs`'s `CarbonIntensityCache`, which wraps `moka`
//! as a pure in-process cache; here the storage is a plain `BTreeMap` per region behind
//! a `tokio::sync::RwLock` so `lookup_range` can walk a sorted key range without an
//! external dependency.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use karbos_common::IntensitySample;
use tokio::sync::RwLock;

use crate::cache::IntensityCache;
use crate::error::CarbonError;

type RegionMap = BTreeMap<DateTime<Utc>, IntensitySample>;

/// In-memory, process-local implementation of [`IntensityCache`].
#[derive(Default)]
pub struct InMemoryIntensityCache {
    regions: RwLock<std::collections::HashMap<String, RegionMap>>,
}

impl InMemoryIntensityCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntensityCache for InMemoryIntensityCache {
    async fn lookup_nearest(
        &self,
        region: &str,
        instant: DateTime<Utc>,
    ) -> Result<Option<IntensitySample>, CarbonError> {
        let regions = self.regions.read().await;
        let Some(map) = regions.get(region) else {
            return Ok(None);
        };

        let window = ChronoDuration::minutes(15);
        let now = Utc::now();
        let best = map
            .range((instant - window)..=(instant + window))
            .map(|(_, sample)| sample)
            .filter(|sample| sample.expires_at > now)
            .min_by(|a, b| {
                let delta_a = (a.instant - instant).num_seconds().abs();
                let delta_b = (b.instant - instant).num_seconds().abs();
                // Nearest first; ties broken by the most-recently-fetched sample.
                delta_a
                    .cmp(&delta_b)
                    .then(b.fetched_at.cmp(&a.fetched_at))
            })
            .cloned();

        Ok(best)
    }

    async fn lookup_range(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<IntensitySample>, CarbonError> {
        let regions = self.regions.read().await;
        let Some(map) = regions.get(region) else {
            return Ok(Vec::new());
        };

        let now = Utc::now();
        Ok(map
            .range(start..=end)
            .map(|(_, sample)| sample.clone())
            .filter(|sample| sample.expires_at > now)
            .collect())
    }

    async fn upsert(&self, sample: &IntensitySample, ttl: Duration) -> Result<(), CarbonError> {
        let mut regions = self.regions.write().await;
        let mut stored = sample.clone();
        stored.expires_at =
            stored.fetched_at + ChronoDuration::from_std(ttl).unwrap_or_default();
        regions
            .entry(stored.region.clone())
            .or_default()
            .insert(stored.instant, stored);
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        samples: &[IntensitySample],
        ttl: Duration,
    ) -> Result<(), CarbonError> {
        // All-or-nothing from the caller's perspective: stage every row, then commit
        // them under a single write-lock acquisition (spec.md §4.2).
        let ttl_duration = ChronoDuration::from_std(ttl).unwrap_or_default();
        let staged: Vec<IntensitySample> = samples
            .iter()
            .map(|sample| {
                let mut stored = sample.clone();
                stored.expires_at = stored.fetched_at + ttl_duration;
                stored
            })
            .collect();

        let mut regions = self.regions.write().await;
        for stored in staged {
            regions
                .entry(stored.region.clone())
                .or_default()
                .insert(stored.instant, stored);
        }
        Ok(())
    }

    async fn purge(&self, max_age: Duration) -> Result<u64, CarbonError> {
        let mut regions = self.regions.write().await;
        let now = Utc::now();
        let mut removed = 0u64;

        for map in regions.values_mut() {
            let stale: Vec<DateTime<Utc>> = map
                .iter()
                .filter(|(_, sample)| !self.is_fresh(sample, max_age) || sample.expires_at <= now)
                .map(|(instant, _)| *instant)
                .collect();
            for instant in stale {
                map.remove(&instant);
                removed += 1;
            }
        }

        Ok(removed)
    }
}

/// Shared handle convenience for the common case of this cache held behind an `Arc`
/// by its owning service.
pub type SharedInMemoryIntensityCache = Arc<InMemoryIntensityCache>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(region: &str, instant: DateTime<Utc>, value: f64) -> IntensitySample {
        IntensitySample::new(
            region,
            instant,
            value,
            "live",
            Utc::now(),
            ChronoDuration::hours(1),
        )
    }

    #[tokio::test]
    async fn lookup_nearest_finds_closest_sample_within_15_minutes() {
        let cache = InMemoryIntensityCache::new();
        let t0 = Utc::now();
        cache
            .upsert(&sample("US-EAST", t0, 100.0), Duration::from_secs(3600))
            .await
            .unwrap();
        cache
            .upsert(
                &sample("US-EAST", t0 + ChronoDuration::hours(1), 200.0),
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        let found = cache
            .lookup_nearest("US-EAST", t0 + ChronoDuration::minutes(10))
            .await
            .unwrap();
        assert_eq!(found.unwrap().value, 100.0);
    }

    #[tokio::test]
    async fn lookup_nearest_outside_15_minutes_is_a_miss() {
        let cache = InMemoryIntensityCache::new();
        let t0 = Utc::now();
        cache
            .upsert(&sample("US-EAST", t0, 100.0), Duration::from_secs(3600))
            .await
            .unwrap();

        let found = cache
            .lookup_nearest("US-EAST", t0 + ChronoDuration::minutes(20))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn lookup_nearest_breaks_ties_by_most_recently_fetched() {
        let cache = InMemoryIntensityCache::new();
        let t0 = Utc::now();
        let older = IntensitySample::new(
            "US-EAST",
            t0 - ChronoDuration::minutes(5),
            100.0,
            "live",
            Utc::now() - ChronoDuration::minutes(10),
            ChronoDuration::hours(1),
        );
        let newer = IntensitySample::new(
            "US-EAST",
            t0 + ChronoDuration::minutes(5),
            200.0,
            "live",
            Utc::now(),
            ChronoDuration::hours(1),
        );
        cache.upsert(&older, Duration::from_secs(3600)).await.unwrap();
        cache.upsert(&newer, Duration::from_secs(3600)).await.unwrap();

        let found = cache.lookup_nearest("US-EAST", t0).await.unwrap().unwrap();
        assert_eq!(found.value, 200.0);
    }

    #[tokio::test]
    async fn lookup_nearest_returns_none_when_only_future_samples_exist() {
        let cache = InMemoryIntensityCache::new();
        let t0 = Utc::now();
        cache
            .upsert(
                &sample("US-EAST", t0 + ChronoDuration::hours(1), 200.0),
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        let found = cache.lookup_nearest("US-EAST", t0).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn lookup_range_filters_to_bounds_and_region() {
        let cache = InMemoryIntensityCache::new();
        let t0 = Utc::now();
        for i in 0..5 {
            cache
                .upsert(
                    &sample("US-EAST", t0 + ChronoDuration::hours(i), 100.0 + i as f64),
                    Duration::from_secs(3600),
                )
                .await
                .unwrap();
        }
        cache
            .upsert(&sample("EU-WEST", t0, 50.0), Duration::from_secs(3600))
            .await
            .unwrap();

        let found = cache
            .lookup_range("US-EAST", t0, t0 + ChronoDuration::hours(2))
            .await
            .unwrap();
        assert_eq!(found.len(), 3);
    }

    #[tokio::test]
    async fn purge_removes_samples_past_max_age() {
        let cache = InMemoryIntensityCache::new();
        let stale = IntensitySample::new(
            "US-EAST",
            Utc::now(),
            100.0,
            "live",
            Utc::now() - ChronoDuration::hours(2),
            ChronoDuration::hours(3),
        );
        cache
            .upsert(&stale, Duration::from_secs(3600))
            .await
            .unwrap();

        let removed = cache.purge(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(cache
            .lookup_range("US-EAST", Utc::now() - ChronoDuration::hours(3), Utc::now())
            .await
            .unwrap()
            .is_empty());
    }
}
