//! karbos-carbon — carbon intelligence: C1 CarbonProvider, C2 IntensityCache,
//! C3 CircuitBreaker, C4 CarbonFetcher.
//!
//! Every collaborator is a trait (`CarbonProvider`, `IntensityCache`) so scheduler and
//! worker-pool tests can swap in a fake without pulling in `reqwest` or `sqlx`.

pub mod breaker;
pub mod cache;
pub mod cache_inmemory;
#[cfg(feature = "sqlx-store")]
pub mod cache_sqlx;
pub mod error;
pub mod fetcher;
pub mod provider;

pub use breaker::{BreakerConfig, CircuitBreaker, STATIC_FALLBACK_PROVENANCE};
pub use cache::IntensityCache;
pub use cache_inmemory::{InMemoryIntensityCache, SharedInMemoryIntensityCache};
#[cfg(feature = "sqlx-store")]
pub use cache_sqlx::{DbPool, SqlxIntensityCache};
pub use error::{CarbonError, ProviderError};
pub use fetcher::{CarbonFetcher, FetcherConfig};
pub use provider::{CarbonProvider, ElectricityMapsClient, WattTimeClient, PROVIDER_CALL_DEADLINE};
