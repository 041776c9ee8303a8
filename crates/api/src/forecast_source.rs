//! Adapts C4's [`CarbonFetcher`] to the [`IntensityForecastSource`] capability C5
//! depends on, keeping the scheduler crate free of a direct dependency on the carbon
//! crate's concrete provider/cache generics.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use karbos_carbon::{CarbonFetcher, CarbonProvider, IntensityCache};
use karbos_common::IntensitySample;
use karbos_scheduler::IntensityForecastSource;

pub struct FetcherForecastSource<P: CarbonProvider, C: IntensityCache> {
    fetcher: Arc<CarbonFetcher<P, C>>,
}

impl<P: CarbonProvider, C: IntensityCache> FetcherForecastSource<P, C> {
    #[must_use]
    pub fn new(fetcher: Arc<CarbonFetcher<P, C>>) -> Self {
        Self { fetcher }
    }
}

impl<P: CarbonProvider, C: IntensityCache> Clone for FetcherForecastSource<P, C> {
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
        }
    }
}

#[async_trait]
impl<P: CarbonProvider, C: IntensityCache> IntensityForecastSource for FetcherForecastSource<P, C> {
    async fn forecast(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<IntensitySample> {
        self.fetcher.call_range(region, start, end).await
    }

    async fn current(&self, region: &str) -> IntensitySample {
        self.fetcher.call_point(region, Utc::now()).await
    }
}
