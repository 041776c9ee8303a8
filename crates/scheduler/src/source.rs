//! The forecast-reading capability the scheduler depends on.
//!
//! Kept as a trait, not a direct dependency on `karbos-carbon`'s `CarbonFetcher`, so
//! scheduler unit tests exercise the sliding-window algorithm against a canned forecast
//! instead of standing up a provider, cache, and breaker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use karbos_common::IntensitySample;

#[async_trait]
pub trait IntensityForecastSource: Send + Sync {
    /// Hourly-granularity forecast samples covering `[start, end]`, ordered by instant.
    /// Never errors — a source with nothing to say for the range returns an empty list.
    async fn forecast(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<IntensitySample>;

    /// Single-instant intensity, used as the immediate-decision fallback when
    /// `forecast` comes back empty (spec.md §4.5 step 3). Never errors.
    async fn current(&self, region: &str) -> IntensitySample;
}
