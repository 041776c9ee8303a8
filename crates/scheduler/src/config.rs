//! SchedulerConfig — the tunables behind the sliding-window algorithm (spec.md §4.5, §5).

use std::time::Duration;

/// Configuration for [`crate::scheduler::Scheduler`].
///
/// Shaped the same way as `aegis-proxy`'s `GreenWaitConfig`: a plain struct with a
/// hand-written `Default` carrying spec.md's defaults, loaded by the (out-of-scope)
/// configuration-loading collaborator.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Width of one forecast bucket (slot quantization granularity).
    pub slot_size: Duration,
    /// Width of the lookahead window the forecast is drawn from, when the request
    /// leaves it unspecified.
    pub default_window_size: Duration,
    /// A current intensity at or below this threshold is always run immediately.
    pub threshold: f64,
    /// A decision is immediate when the optimal window starts within this long of now.
    pub immediacy_proximity: Duration,
    /// A decision is immediate when the optimal window saves less than this percent.
    pub minimum_savings_percent: f64,
    /// Absolute tolerance, in gCO2eq/kWh, within which a window is kept in
    /// `alternatives` relative to the current minimum mean.
    pub alternatives_tolerance: f64,
    /// Maximum number of alternative windows retained on a [`karbos_common::SchedulingDecision`].
    pub max_alternatives: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slot_size: Duration::from_secs(3600),
            default_window_size: Duration::from_secs(24 * 3600),
            threshold: 400.0,
            immediacy_proximity: Duration::from_secs(5 * 60),
            minimum_savings_percent: 10.0,
            alternatives_tolerance: 10.0,
            max_alternatives: 3,
        }
    }
}
