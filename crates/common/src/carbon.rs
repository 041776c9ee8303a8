//! Carbon intensity sample — the natural-key record C2 (IntensityCache) owns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single grid carbon-intensity reading for a region at an instant.
///
/// `(region, instant)` is the natural key per spec.md §3; upserts overwrite on that
/// pair. `provenance` carries "live" vs. "static-fallback" vs. a named provider:
/// fallback and live data share one shape and differ only by provenance, never by a
/// separate type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntensitySample {
    pub region: String,
    pub instant: DateTime<Utc>,
    pub value: f64,
    pub unit: &'static str,
    pub provenance: String,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IntensitySample {
    pub const UNIT: &'static str = "gCO2eq/kWh";

    #[must_use]
    pub fn new(
        region: impl Into<String>,
        instant: DateTime<Utc>,
        value: f64,
        provenance: impl Into<String>,
        fetched_at: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            region: region.into(),
            instant,
            value,
            unit: Self::UNIT,
            provenance: provenance.into(),
            fetched_at,
            expires_at: fetched_at + ttl,
        }
    }

    #[must_use]
    pub fn is_static_fallback(&self) -> bool {
        self.provenance == "static-fallback"
    }
}
