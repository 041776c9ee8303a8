//! C1 CarbonProvider — grid-intensity clients (spec.md §4.1).
//!
//! Grounded on `aegis-energy/src/client.rs`: `WattTimeClient` keeps the same
//! double-checked-lock token cache and percent-index reading, and
//! `ElectricityMapsClient` keeps the same `auth-token` header and direct
//! `carbonIntensity` field mapping. Both are adapted from `aegis-energy`'s
//! single-current-reading trait to spec.md's `current` + `forecast` capability.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use karbos_common::IntensitySample;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::error::ProviderError;

/// Hard per-call deadline from spec.md §4.1: "all provider calls are deadline-bounded
/// (hard cap of ten seconds per call)".
pub const PROVIDER_CALL_DEADLINE: StdDuration = StdDuration::from_secs(10);

/// Capability a carbon-intensity provider must expose. The core never holds a
/// concrete provider type past construction — it depends on this trait, so tests can
/// swap in a fake provider without pulling in `reqwest`.
#[async_trait::async_trait]
pub trait CarbonProvider: Send + Sync {
    /// Current carbon intensity for `region`.
    async fn current(&self, region: &str) -> Result<IntensitySample, ProviderError>;

    /// Hourly-granularity forecast samples covering `[start, end]`, with monotonic
    /// instants, per spec.md §4.1.
    async fn forecast(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<IntensitySample>, ProviderError>;

    /// Human-readable provenance tag stamped onto every sample this provider returns.
    fn provenance(&self) -> &'static str;
}

async fn with_deadline<T>(
    fut: impl std::future::Future<Output = Result<T, ProviderError>>,
) -> Result<T, ProviderError> {
    match tokio::time::timeout(PROVIDER_CALL_DEADLINE, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Unreachable(
            "provider call exceeded the 10s deadline".to_string(),
        )),
    }
}

/// WattTime API response for authentication.
#[derive(Debug, serde::Deserialize)]
struct WattTimeLoginResponse {
    token: String,
}

/// WattTime v3 `/signal-index` response (authority-keyed scalar index in [0, 100]).
#[derive(Debug, serde::Deserialize)]
struct WattTimeIndexResponse {
    percent: Option<f64>,
    point_time: String,
}

/// WattTime v3 `/forecast` response entry.
#[derive(Debug, serde::Deserialize)]
struct WattTimeForecastPoint {
    percent: Option<f64>,
    point_time: String,
}

/// Authority-keyed provider: returns a scalar index in [0, 100], linearly rescaled to
/// [0, 800] gCO2eq/kWh per spec.md §4.1.
pub struct WattTimeClient {
    client: reqwest::Client,
    base_url: String,
    token: Arc<RwLock<Option<String>>>,
    username: String,
    password: String,
}

impl WattTimeClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.watttime.org/v3";
    const INDEX_MAX: f64 = 800.0;

    #[must_use]
    pub fn new(username: String, password: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            token: Arc::new(RwLock::new(None)),
            username,
            password,
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn rescale(percent: f64) -> f64 {
        (percent / 100.0) * Self::INDEX_MAX
    }

    async fn ensure_token(&self) -> Result<String, ProviderError> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref() {
                return Ok(token.clone());
            }
        }

        let mut guard = self.token.write().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }

        debug!("authenticating with WattTime API");
        let response = self
            .client
            .get(format!("{}/login", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::AuthFailed);
        }
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 60,
            });
        }

        let body: WattTimeLoginResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        *guard = Some(body.token.clone());
        Ok(body.token)
    }
}

#[async_trait::async_trait]
impl CarbonProvider for WattTimeClient {
    #[instrument(skip(self))]
    async fn current(&self, region: &str) -> Result<IntensitySample, ProviderError> {
        with_deadline(async {
            let token = self.ensure_token().await?;
            let response = self
                .client
                .get(format!("{}/signal-index", self.base_url))
                .bearer_auth(&token)
                .query(&[("region", region)])
                .send()
                .await?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(ProviderError::RateLimited {
                    retry_after_secs: 60,
                });
            }
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(ProviderError::Malformed(format!(
                    "region not found: {region}"
                )));
            }

            let data: WattTimeIndexResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::Malformed(e.to_string()))?;

            let instant = DateTime::parse_from_rfc3339(&data.point_time)
                .map_err(|e| ProviderError::Malformed(e.to_string()))?
                .with_timezone(&Utc);

            let value = Self::rescale(data.percent.unwrap_or(50.0));
            Ok(IntensitySample::new(
                region,
                instant,
                value,
                self.provenance(),
                Utc::now(),
                Duration::minutes(5),
            ))
        })
        .await
    }

    #[instrument(skip(self))]
    async fn forecast(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<IntensitySample>, ProviderError> {
        with_deadline(async {
            let token = self.ensure_token().await?;
            let response = self
                .client
                .get(format!("{}/forecast", self.base_url))
                .bearer_auth(&token)
                .query(&[
                    ("region", region.to_string()),
                    ("start", start.to_rfc3339()),
                    ("end", end.to_rfc3339()),
                ])
                .send()
                .await?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(ProviderError::RateLimited {
                    retry_after_secs: 60,
                });
            }

            let points: Vec<WattTimeForecastPoint> = response
                .json()
                .await
                .map_err(|e| ProviderError::Malformed(e.to_string()))?;

            let fetched_at = Utc::now();
            let mut samples = Vec::with_capacity(points.len());
            for point in points {
                let instant = DateTime::parse_from_rfc3339(&point.point_time)
                    .map_err(|e| ProviderError::Malformed(e.to_string()))?
                    .with_timezone(&Utc);
                samples.push(IntensitySample::new(
                    region,
                    instant,
                    Self::rescale(point.percent.unwrap_or(50.0)),
                    self.provenance(),
                    fetched_at,
                    Duration::hours(1),
                ));
            }
            samples.sort_by_key(|s| s.instant);
            Ok(samples)
        })
        .await
    }

    fn provenance(&self) -> &'static str {
        "watttime"
    }
}

/// Electricity Maps API response (zone-keyed, already in gCO2eq/kWh).
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ElectricityMapsResponse {
    carbon_intensity: f64,
    datetime: String,
}

/// Electricity Maps forecast entry.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ElectricityMapsForecastEntry {
    carbon_intensity: f64,
    datetime: String,
}

#[derive(Debug, serde::Deserialize)]
struct ElectricityMapsForecastResponse {
    forecast: Vec<ElectricityMapsForecastEntry>,
}

/// Zone-keyed provider: returns a current datum and a forecast datum list directly in
/// gCO2eq/kWh, per spec.md §4.1.
pub struct ElectricityMapsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ElectricityMapsClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.electricitymap.org/v3";

    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            api_key,
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait::async_trait]
impl CarbonProvider for ElectricityMapsClient {
    #[instrument(skip(self))]
    async fn current(&self, region: &str) -> Result<IntensitySample, ProviderError> {
        with_deadline(async {
            let response = self
                .client
                .get(format!("{}/carbon-intensity/latest", self.base_url))
                .header("auth-token", &self.api_key)
                .query(&[("zone", region)])
                .send()
                .await?;

            if response.status() == reqwest::StatusCode::UNAUTHORIZED {
                return Err(ProviderError::AuthFailed);
            }
            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(ProviderError::RateLimited {
                    retry_after_secs: 60,
                });
            }

            let data: ElectricityMapsResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::Malformed(e.to_string()))?;

            let instant = DateTime::parse_from_rfc3339(&data.datetime)
                .map_err(|e| ProviderError::Malformed(e.to_string()))?
                .with_timezone(&Utc);

            Ok(IntensitySample::new(
                region,
                instant,
                data.carbon_intensity,
                self.provenance(),
                Utc::now(),
                Duration::hours(1),
            ))
        })
        .await
    }

    #[instrument(skip(self))]
    async fn forecast(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<IntensitySample>, ProviderError> {
        with_deadline(async {
            let response = self
                .client
                .get(format!("{}/carbon-intensity/forecast", self.base_url))
                .header("auth-token", &self.api_key)
                .query(&[
                    ("zone", region.to_string()),
                    ("start", start.to_rfc3339()),
                    ("end", end.to_rfc3339()),
                ])
                .send()
                .await?;

            if response.status() == reqwest::StatusCode::UNAUTHORIZED {
                return Err(ProviderError::AuthFailed);
            }

            let data: ElectricityMapsForecastResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::Malformed(e.to_string()))?;

            let fetched_at = Utc::now();
            let mut samples = Vec::with_capacity(data.forecast.len());
            for entry in data.forecast {
                let instant = DateTime::parse_from_rfc3339(&entry.datetime)
                    .map_err(|e| ProviderError::Malformed(e.to_string()))?
                    .with_timezone(&Utc);
                samples.push(IntensitySample::new(
                    region,
                    instant,
                    entry.carbon_intensity,
                    self.provenance(),
                    fetched_at,
                    Duration::hours(1),
                ));
            }
            samples.sort_by_key(|s| s.instant);
            Ok(samples)
        })
        .await
    }

    fn provenance(&self) -> &'static str {
        "electricity-maps"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn watttime_authenticates_and_caches_token() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "tok-123"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client =
            WattTimeClient::new("u".into(), "p".into()).with_base_url(mock_server.uri());

        let first = client.ensure_token().await.unwrap();
        let second = client.ensure_token().await.unwrap();
        assert_eq!(first, "tok-123");
        assert_eq!(second, "tok-123");
    }

    #[tokio::test]
    async fn watttime_current_rescales_percent_to_gco2_range() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "t"})),
            )
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/signal-index"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "percent": 50.0,
                "point_time": "2025-12-04T14:00:00Z"
            })))
            .mount(&mock_server)
            .await;

        let client =
            WattTimeClient::new("u".into(), "p".into()).with_base_url(mock_server.uri());
        let sample = client.current("CAISO_NORTH").await.unwrap();
        assert!((sample.value - 400.0).abs() < f64::EPSILON);
        assert_eq!(sample.provenance, "watttime");
    }

    #[tokio::test]
    async fn electricity_maps_passes_through_carbon_intensity() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/carbon-intensity/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "zone": "DE",
                "carbonIntensity": 250.5,
                "datetime": "2025-12-25T14:00:00Z",
                "updatedAt": "2025-12-25T14:05:00Z"
            })))
            .mount(&mock_server)
            .await;

        let client =
            ElectricityMapsClient::new("key".into()).with_base_url(mock_server.uri());
        let sample = client.current("DE").await.unwrap();
        assert_eq!(sample.value, 250.5);
        assert_eq!(sample.provenance, "electricity-maps");
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_failed() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/carbon-intensity/latest"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let client =
            ElectricityMapsClient::new("key".into()).with_base_url(mock_server.uri());
        let err = client.current("DE").await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthFailed));
    }
}
