//! SchedulingDecision — the transient output of C5 (Scheduler). Never persisted
//! beyond the submission response, per spec.md §3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether the scheduler chose to run now or to wait for a greener window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    Immediate,
    Scheduled,
}

/// A near-optimal sliding window, within the alternatives tolerance of the minimum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternativeWindow {
    pub start: DateTime<Utc>,
    pub mean_intensity: f64,
}

/// The result of running the sliding-window minimization over a carbon forecast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingDecision {
    pub job_id: Uuid,
    pub kind: DecisionKind,
    pub scheduled_start: DateTime<Utc>,
    pub expected_intensity: f64,
    pub carbon_savings: f64,
    pub savings_percent: f64,
    /// Up to three near-optimal alternative windows, per spec.md §4.5 step 5.
    pub alternatives: Vec<AlternativeWindow>,
}

impl SchedulingDecision {
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        matches!(self.kind, DecisionKind::Immediate)
    }
}
