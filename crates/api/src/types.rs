//! Request/response shapes for the submission, inspection, and forecast operations
//! (spec.md §6). These are the contract a transport (out of scope) would serialize;
//! the operations themselves are fully implemented here.

use chrono::{DateTime, Utc};
use karbos_common::{JobStatus, WorkItem};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound `listByUser` clamps its `limit` argument to.
pub const MAX_LIST_BY_USER_LIMIT: u64 = 100;
/// Upper bound `listAll` clamps its `limit` argument to.
pub const MAX_LIST_ALL_LIMIT: u64 = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub user_id: String,
    pub docker_image: String,
    #[serde(default)]
    pub argv: Option<Vec<String>>,
    /// ISO-8601 instant. Kept as a raw string so malformed input surfaces as
    /// [`crate::error::ApiError::BadDeadlineFormat`] rather than failing deserialization
    /// before validation runs.
    pub deadline: String,
    #[serde(default)]
    pub estimated_duration_seconds: Option<i64>,
    #[serde(default)]
    pub region: Option<String>,
    /// When true, return the scheduling decision without persisting or enqueuing.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub scheduled_time: DateTime<Utc>,
    pub immediate: bool,
    pub expected_intensity: f64,
    pub carbon_savings: f64,
    pub message: String,
}

/// `listByUser`'s wrapped response (spec.md §6: "wraps its list in
/// `{userId, count, items}`").
#[derive(Debug, Clone, Serialize)]
pub struct UserJobList {
    pub user_id: String,
    pub count: usize,
    pub items: Vec<WorkItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastSample {
    pub region: String,
    pub instant: DateTime<Utc>,
    pub intensity: f64,
    pub unit: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastResponse {
    pub region: String,
    pub samples: Vec<ForecastSample>,
    pub current_intensity: Option<f64>,
    pub optimal_instant: Option<DateTime<Utc>>,
}

/// Clamp `limit` to `[1, max]`, defaulting to `max` when zero.
#[must_use]
pub fn clamp_limit(limit: u64, max: u64) -> u64 {
    if limit == 0 {
        max
    } else {
        limit.min(max)
    }
}
