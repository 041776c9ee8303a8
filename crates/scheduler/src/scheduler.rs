//! C5 Scheduler — sliding-window carbon minimization (spec.md §4.5).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use karbos_common::{AlternativeWindow, DecisionKind, IntensitySample, SchedulingDecision};
use tracing::instrument;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::request::ScheduleRequest;
use crate::source::IntensityForecastSource;

/// One candidate sliding-window position: the instant of its first slot and the
/// arithmetic mean of the slot intensities it covers.
struct Candidate {
    start: DateTime<Utc>,
    mean: f64,
}

/// Runs the sliding-window minimization over a carbon forecast to decide whether a job
/// should start now or wait for a greener window.
pub struct Scheduler<S: IntensityForecastSource> {
    source: S,
    config: SchedulerConfig,
}

impl<S: IntensityForecastSource> Scheduler<S> {
    #[must_use]
    pub fn new(source: S, config: SchedulerConfig) -> Self {
        Self { source, config }
    }

    /// Produce a [`SchedulingDecision`] for `request`, or reject it per spec.md §4.5's
    /// validation rules.
    #[instrument(skip(self, request), fields(job_id = %request.job_id))]
    pub async fn schedule(
        &self,
        request: &ScheduleRequest,
    ) -> Result<SchedulingDecision, SchedulerError> {
        let now = Utc::now();
        request.validate(now)?;

        let earliest_start = request.earliest_start.unwrap_or(now);
        let window_size = request
            .window_size
            .unwrap_or_else(|| ChronoDuration::from_std(self.config.default_window_size).unwrap_or_default());
        let end_time = (earliest_start + window_size).min(request.deadline);

        let forecast = self
            .source
            .forecast(&request.region, earliest_start, end_time)
            .await;

        if forecast.is_empty() {
            let current = self.source.current(&request.region).await;
            return Ok(Self::immediate(
                request.job_id,
                now,
                current.value,
                Vec::new(),
            ));
        }

        let slot_size = ChronoDuration::from_std(self.config.slot_size).unwrap_or(ChronoDuration::hours(1));
        let window_slots = Self::window_slots(request.duration, slot_size);
        let num_slots = forecast.len();
        let window_slots = window_slots.min(num_slots).max(1);

        let candidates = Self::slide(&forecast, window_slots);
        // Guaranteed non-empty: forecast is non-empty and window_slots <= num_slots.
        let Some(optimal) = Self::pick_optimal(&candidates) else {
            let current_intensity = forecast[0].value;
            return Ok(Self::immediate(
                request.job_id,
                now,
                current_intensity,
                Vec::new(),
            ));
        };

        let current_intensity = forecast[0].value;
        let optimal_mean = optimal.mean;
        let optimal_start = optimal.start;

        let savings = current_intensity - optimal_mean;
        let savings_percent = if current_intensity > 0.0 {
            (savings / current_intensity) * 100.0
        } else {
            0.0
        };

        let alternatives = Self::collect_alternatives(
            &candidates,
            optimal_mean,
            optimal_start,
            self.config.alternatives_tolerance,
            self.config.max_alternatives,
        );

        let proximity = ChronoDuration::from_std(self.config.immediacy_proximity).unwrap_or_default();
        let immediate = (optimal_start - now).abs() < proximity
            || savings_percent < self.config.minimum_savings_percent
            || current_intensity < self.config.threshold;

        if immediate {
            return Ok(Self::immediate(
                request.job_id,
                now,
                current_intensity,
                alternatives,
            ));
        }

        Ok(SchedulingDecision {
            job_id: request.job_id,
            kind: DecisionKind::Scheduled,
            scheduled_start: optimal_start,
            expected_intensity: optimal_mean,
            carbon_savings: savings,
            savings_percent,
            alternatives,
        })
    }

    fn immediate(
        job_id: uuid::Uuid,
        now: DateTime<Utc>,
        current_intensity: f64,
        alternatives: Vec<AlternativeWindow>,
    ) -> SchedulingDecision {
        SchedulingDecision {
            job_id,
            kind: DecisionKind::Immediate,
            scheduled_start: now,
            expected_intensity: current_intensity,
            carbon_savings: 0.0,
            savings_percent: 0.0,
            alternatives,
        }
    }

    /// `⌈duration / slotSize⌉`, at least one slot wide.
    fn window_slots(duration: ChronoDuration, slot_size: ChronoDuration) -> usize {
        let slot_secs = slot_size.num_seconds().max(1);
        let duration_secs = duration.num_seconds().max(0);
        let slots = duration_secs.div_euclid(slot_secs) + i64::from(duration_secs % slot_secs != 0);
        usize::try_from(slots.max(1)).unwrap_or(1)
    }

    /// Every window position (stepped one slot at a time) of width `window_slots`
    /// slots, paired with the mean forecast intensity across that window.
    fn slide(forecast: &[IntensitySample], window_slots: usize) -> Vec<Candidate> {
        if window_slots == 0 || window_slots > forecast.len() {
            return Vec::new();
        }

        let mut candidates = Vec::with_capacity(forecast.len() - window_slots + 1);
        for start_idx in 0..=(forecast.len() - window_slots) {
            let slice = &forecast[start_idx..start_idx + window_slots];
            let mean = slice.iter().map(|s| s.value).sum::<f64>() / slice.len() as f64;
            candidates.push(Candidate {
                start: slice[0].instant,
                mean,
            });
        }
        candidates
    }

    /// The minimum-mean candidate; ties favor the earlier (lower-index) window, since
    /// `candidates` is already ordered by ascending start.
    fn pick_optimal(candidates: &[Candidate]) -> Option<&Candidate> {
        candidates.iter().fold(None, |best, candidate| match best {
            None => Some(candidate),
            Some(current_best) if candidate.mean < current_best.mean => Some(candidate),
            Some(current_best) => Some(current_best),
        })
    }

    /// Up to `max_alternatives` windows within `tolerance` (absolute, gCO2eq/kWh) of
    /// `optimal_mean`, excluding the optimal window itself, ordered by start time.
    fn collect_alternatives(
        candidates: &[Candidate],
        optimal_mean: f64,
        optimal_start: DateTime<Utc>,
        tolerance: f64,
        max_alternatives: usize,
    ) -> Vec<AlternativeWindow> {
        let mut alternatives: Vec<AlternativeWindow> = candidates
            .iter()
            .filter(|c| c.start != optimal_start && (c.mean - optimal_mean).abs() <= tolerance)
            .map(|c| AlternativeWindow {
                start: c.start,
                mean_intensity: c.mean,
            })
            .collect();
        alternatives.sort_by_key(|a| a.start);
        alternatives.truncate(max_alternatives);
        alternatives
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct CannedSource {
        samples: Vec<IntensitySample>,
        current: f64,
    }

    #[async_trait]
    impl IntensityForecastSource for CannedSource {
        async fn forecast(
            &self,
            _region: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Vec<IntensitySample> {
            self.samples.clone()
        }

        async fn current(&self, region: &str) -> IntensitySample {
            IntensitySample::new(
                region,
                Utc::now(),
                self.current,
                "live",
                Utc::now(),
                ChronoDuration::hours(1),
            )
        }
    }

    fn sample(hour_offset: i64, value: f64, now: DateTime<Utc>) -> IntensitySample {
        IntensitySample::new(
            "US-EAST",
            now + ChronoDuration::hours(hour_offset),
            value,
            "live",
            now,
            ChronoDuration::hours(1),
        )
    }

    fn request(now: DateTime<Utc>, deadline_hours: i64, duration_hours: i64) -> ScheduleRequest {
        ScheduleRequest {
            job_id: uuid::Uuid::new_v4(),
            region: "US-EAST".to_string(),
            duration: ChronoDuration::hours(duration_hours),
            deadline: now + ChronoDuration::hours(deadline_hours),
            window_size: None,
            earliest_start: None,
        }
    }

    #[tokio::test]
    async fn runs_immediately_when_current_intensity_is_already_below_threshold() {
        let now = Utc::now();
        let source = CannedSource {
            samples: vec![sample(0, 100.0, now)],
            current: 100.0,
        };
        let scheduler = Scheduler::new(source, SchedulerConfig::default());
        let decision = scheduler.schedule(&request(now, 6, 1)).await.unwrap();
        assert_eq!(decision.kind, DecisionKind::Immediate);
        assert_eq!(decision.carbon_savings, 0.0);
    }

    #[tokio::test]
    async fn waits_for_a_meaningfully_greener_window() {
        let now = Utc::now();
        let source = CannedSource {
            samples: vec![
                sample(0, 600.0, now),
                sample(1, 600.0, now),
                sample(2, 100.0, now),
                sample(3, 600.0, now),
                sample(4, 600.0, now),
            ],
            current: 600.0,
        };
        let scheduler = Scheduler::new(source, SchedulerConfig::default());
        let decision = scheduler.schedule(&request(now, 6, 1)).await.unwrap();
        assert_eq!(decision.kind, DecisionKind::Scheduled);
        assert!((decision.expected_intensity - 100.0).abs() < f64::EPSILON);
        assert!(decision.carbon_savings > 0.0);
        assert_eq!(decision.scheduled_start, now + ChronoDuration::hours(2));
    }

    #[tokio::test]
    async fn empty_forecast_falls_back_to_current_point_call() {
        let now = Utc::now();
        let source = CannedSource {
            samples: Vec::new(),
            current: 250.0,
        };
        let scheduler = Scheduler::new(source, SchedulerConfig::default());
        let decision = scheduler.schedule(&request(now, 6, 1)).await.unwrap();
        assert_eq!(decision.kind, DecisionKind::Immediate);
        assert_eq!(decision.expected_intensity, 250.0);
        assert_eq!(decision.carbon_savings, 0.0);
    }

    #[tokio::test]
    async fn rejects_empty_region() {
        let now = Utc::now();
        let source = CannedSource {
            samples: vec![sample(0, 100.0, now)],
            current: 100.0,
        };
        let scheduler = Scheduler::new(source, SchedulerConfig::default());
        let mut req = request(now, 6, 1);
        req.region = String::new();
        assert!(matches!(
            scheduler.schedule(&req).await,
            Err(SchedulerError::EmptyRegion)
        ));
    }

    #[tokio::test]
    async fn rejects_non_positive_duration() {
        let now = Utc::now();
        let source = CannedSource {
            samples: vec![sample(0, 100.0, now)],
            current: 100.0,
        };
        let scheduler = Scheduler::new(source, SchedulerConfig::default());
        let mut req = request(now, 6, 1);
        req.duration = ChronoDuration::zero();
        assert!(matches!(
            scheduler.schedule(&req).await,
            Err(SchedulerError::NonPositiveDuration(_))
        ));
    }

    #[tokio::test]
    async fn rejects_deadline_not_in_the_future() {
        let now = Utc::now();
        let source = CannedSource {
            samples: vec![sample(0, 100.0, now)],
            current: 100.0,
        };
        let scheduler = Scheduler::new(source, SchedulerConfig::default());
        let mut req = request(now, 6, 1);
        req.deadline = now - ChronoDuration::minutes(1);
        assert!(matches!(
            scheduler.schedule(&req).await,
            Err(SchedulerError::DeadlineInPast { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_earliest_start_plus_duration_past_deadline() {
        let now = Utc::now();
        let source = CannedSource {
            samples: vec![sample(0, 100.0, now)],
            current: 100.0,
        };
        let scheduler = Scheduler::new(source, SchedulerConfig::default());
        let mut req = request(now, 1, 1);
        req.earliest_start = Some(now + ChronoDuration::minutes(55));
        assert!(matches!(
            scheduler.schedule(&req).await,
            Err(SchedulerError::NoRoomBeforeDeadline { .. })
        ));
    }

    #[tokio::test]
    async fn multi_slot_duration_widens_the_sliding_window() {
        let now = Utc::now();
        // A 3-hour job: the 3-slot window covering hours [2,3,4] (mean 100) beats any
        // single greenest hour alone, exercising windowSlots > 1.
        let mut samples = vec![sample(0, 600.0, now), sample(1, 600.0, now)];
        for hour in 2..5 {
            samples.push(sample(hour, 100.0, now));
        }
        for hour in 5..10 {
            samples.push(sample(hour, 600.0, now));
        }
        let source = CannedSource {
            samples,
            current: 600.0,
        };
        let config = SchedulerConfig {
            slot_size: Duration::from_secs(3600),
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(source, config);
        let decision = scheduler.schedule(&request(now, 10, 3)).await.unwrap();
        assert_eq!(decision.kind, DecisionKind::Scheduled);
        assert_eq!(decision.scheduled_start, now + ChronoDuration::hours(2));
        assert!((decision.expected_intensity - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn alternatives_are_capped_at_three_and_exclude_the_chosen_window() {
        let now = Utc::now();
        let mut samples = vec![sample(0, 600.0, now)];
        for hour in 1..24 {
            samples.push(sample(hour, 150.0 + hour as f64, now));
        }
        let source = CannedSource {
            samples,
            current: 600.0,
        };
        let scheduler = Scheduler::new(source, SchedulerConfig::default());
        let decision = scheduler.schedule(&request(now, 24, 1)).await.unwrap();
        assert_eq!(decision.kind, DecisionKind::Scheduled);
        assert!(decision.alternatives.len() <= 3);
        assert!(!decision
            .alternatives
            .iter()
            .any(|a| a.start == decision.scheduled_start));
    }

    #[tokio::test]
    async fn runs_immediately_when_savings_percent_is_below_ten() {
        let now = Utc::now();
        // Best window only shaves off ~5%: the immediacy rule's savingsPercent<10
        // branch should fire even though the window starts hours away.
        let source = CannedSource {
            samples: vec![
                sample(0, 420.0, now),
                sample(1, 420.0, now),
                sample(2, 400.0, now),
                sample(3, 420.0, now),
            ],
            current: 420.0,
        };
        let scheduler = Scheduler::new(source, SchedulerConfig::default());
        let decision = scheduler.schedule(&request(now, 6, 1)).await.unwrap();
        assert_eq!(decision.kind, DecisionKind::Immediate);
    }
}
