//! C2 IntensityCache — the persistent, TTL-bounded cache capability (spec.md §4.2).
//!
//! Grounded on `aegis-energy/src/cache.rs`'s `CarbonIntensityCache`: the `get`/`put`
//! vocabulary and the "treat an expired entry as a miss" behavior survive unchanged.
//! The storage itself is promoted from a single in-process `moka` cache to a capability
//! trait with two implementations — durable (`sqlx`, see `cache_sqlx.rs`) and in-memory
//! (here) — so the scheduler and fetcher depend on the trait, never a concrete store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use karbos_common::IntensitySample;

use crate::error::CarbonError;

/// Durable, TTL-bounded storage for carbon intensity samples keyed by `(region, instant)`.
#[async_trait]
pub trait IntensityCache: Send + Sync {
    /// The freshest sample for `region` at or before `instant`, if one has not expired.
    async fn lookup_nearest(
        &self,
        region: &str,
        instant: DateTime<Utc>,
    ) -> Result<Option<IntensitySample>, CarbonError>;

    /// All unexpired samples for `region` whose instant falls in `[start, end]`, ordered
    /// by instant.
    async fn lookup_range(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<IntensitySample>, CarbonError>;

    /// Insert or overwrite the sample at its `(region, instant)` natural key.
    async fn upsert(&self, sample: &IntensitySample, ttl: Duration) -> Result<(), CarbonError>;

    /// Insert or overwrite a batch of samples, as `upsert` applied to each.
    async fn bulk_upsert(
        &self,
        samples: &[IntensitySample],
        ttl: Duration,
    ) -> Result<(), CarbonError>;

    /// Remove samples older than `max_age`, relative to their `fetched_at`. Returns the
    /// number removed.
    async fn purge(&self, max_age: Duration) -> Result<u64, CarbonError>;

    /// Whether `sample` is still within `max_age` of now, relative to `fetched_at`.
    fn is_fresh(&self, sample: &IntensitySample, max_age: Duration) -> bool {
        let age = Utc::now().signed_duration_since(sample.fetched_at);
        age.to_std().map(|age| age <= max_age).unwrap_or(false)
    }
}
