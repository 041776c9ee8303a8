//! Errors for the carbon-intelligence capability.

use thiserror::Error;

/// Failures surfaced by a [`crate::provider::CarbonProvider`]. Per spec.md §4.1 the
/// core treats all four as transient and never distinguishes them downstream of the
/// circuit breaker — they are still modeled distinctly here since a provider
/// implementation (and its tests) benefit from knowing which one occurred.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    #[error("provider authentication failed")]
    AuthFailed,

    #[error("provider rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider returned malformed data: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Unreachable(err.to_string())
    }
}

/// Errors for the carbon-intelligence crate as a whole (cache, breaker, fetcher).
#[derive(Debug, Error)]
pub enum CarbonError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[cfg(feature = "sqlx-store")]
    #[error("cache storage error: {0}")]
    Storage(#[from] sqlx::Error),
}
