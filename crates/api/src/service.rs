//! KarbosService — the submission, inspection, and forecast operations of spec.md §6,
//! composed from C4 (CarbonFetcher), C5 (Scheduler), C6 (JobStore), C7 (DualQueue).
//!
//! Whatever transport a deployment fronts this with (axum, tonic, a CLI) is the named
//! out-of-scope "HTTP routing layer" collaborator; every operation below is itself
//! fully implemented, matching spec.md §1's "only the operations ... are contractually
//! defined."

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use karbos_carbon::{CarbonFetcher, CarbonProvider, IntensityCache};
use karbos_common::{JobStatus, QueueEntry, WorkItem, DEFAULT_ESTIMATED_RUNTIME_SECS};
use karbos_queue::DualQueue;
use karbos_scheduler::{ScheduleRequest, Scheduler, SchedulerConfig, SchedulerError};
use karbos_store::JobStore;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::forecast_source::FetcherForecastSource;
use crate::types::{
    clamp_limit, ForecastResponse, ForecastSample, SubmitRequest, SubmitResponse, UserJobList,
    MAX_LIST_ALL_LIMIT, MAX_LIST_BY_USER_LIMIT,
};

/// Hours of forecast the `forecast()` operation returns, per spec.md §6 ("up to 24
/// hours of data").
const FORECAST_WINDOW_HOURS: i64 = 24;

/// Composes the carbon-aware scheduling decision with durable persistence and
/// enqueueing into one request/response boundary.
pub struct KarbosService<P: CarbonProvider, C: IntensityCache, S: JobStore, Q: DualQueue> {
    fetcher: Arc<CarbonFetcher<P, C>>,
    scheduler: Scheduler<FetcherForecastSource<P, C>>,
    store: Arc<S>,
    queue: Arc<Q>,
    default_region: String,
}

impl<P: CarbonProvider, C: IntensityCache, S: JobStore, Q: DualQueue> KarbosService<P, C, S, Q> {
    #[must_use]
    pub fn new(
        fetcher: Arc<CarbonFetcher<P, C>>,
        store: Arc<S>,
        queue: Arc<Q>,
        scheduler_config: SchedulerConfig,
        default_region: impl Into<String>,
    ) -> Self {
        let source = FetcherForecastSource::new(Arc::clone(&fetcher));
        Self {
            fetcher,
            scheduler: Scheduler::new(source, scheduler_config),
            store,
            queue,
            default_region: default_region.into(),
        }
    }

    /// `submit(req)` (spec.md §6). Validates, asks C5 for a decision, then — unless
    /// `req.dry_run` — persists via C6 and enqueues via C7.
    #[instrument(skip(self, req), fields(user_id = %req.user_id))]
    pub async fn submit(&self, req: SubmitRequest) -> Result<SubmitResponse, ApiError> {
        if req.user_id.trim().is_empty() {
            return Err(ApiError::Validation("userId is required".to_string()));
        }
        if req.docker_image.trim().is_empty() {
            return Err(ApiError::Validation("dockerImage is required".to_string()));
        }
        if req.deadline.trim().is_empty() {
            return Err(ApiError::Validation("deadline is required".to_string()));
        }

        let deadline: DateTime<Utc> = DateTime::parse_from_rfc3339(&req.deadline)
            .map_err(|_| ApiError::BadDeadlineFormat(req.deadline.clone()))?
            .with_timezone(&Utc);

        let now = Utc::now();
        if deadline <= now {
            return Err(ApiError::DeadlineInPast);
        }

        let estimated_runtime = ChronoDuration::seconds(
            req.estimated_duration_seconds
                .unwrap_or(DEFAULT_ESTIMATED_RUNTIME_SECS),
        );
        let region = req
            .region
            .clone()
            .unwrap_or_else(|| self.default_region.clone());
        let argv = req.argv.clone().unwrap_or_default();

        let job_id = Uuid::new_v4();
        let schedule_request = ScheduleRequest {
            job_id,
            region: region.clone(),
            duration: estimated_runtime,
            deadline,
            window_size: None,
            earliest_start: None,
        };

        let decision = self
            .scheduler
            .schedule(&schedule_request)
            .await
            .map_err(Self::map_scheduler_error)?;

        let message = if decision.is_immediate() {
            format!(
                "running now at an expected {:.1} gCO2eq/kWh",
                decision.expected_intensity
            )
        } else {
            format!(
                "scheduled for {} to save an estimated {:.1} gCO2eq/kWh ({:.1}%)",
                decision.scheduled_start, decision.carbon_savings, decision.savings_percent
            )
        };

        if req.dry_run {
            return Ok(SubmitResponse {
                id: job_id,
                status: JobStatus::Pending,
                created_at: now,
                scheduled_time: decision.scheduled_start,
                immediate: decision.is_immediate(),
                expected_intensity: decision.expected_intensity,
                carbon_savings: decision.carbon_savings,
                message,
            });
        }

        let mut item = WorkItem::new(
            req.user_id.clone(),
            req.docker_image.clone(),
            argv.clone(),
            deadline,
            estimated_runtime,
            region,
            decision.scheduled_start,
        );
        item.id = job_id;
        if !decision.is_immediate() {
            item.status = JobStatus::Delayed;
        }

        let created = self.store.create(item).await?;

        let entry = QueueEntry::new(
            created.id,
            created.docker_image.clone(),
            created.argv.clone(),
            decision.scheduled_start,
        );

        if decision.is_immediate() {
            self.queue.push_immediate(&entry).await?;
        } else {
            self.queue.push_delayed(&entry).await?;
        }

        info!(job_id = %created.id, immediate = decision.is_immediate(), "job submitted");

        Ok(SubmitResponse {
            id: created.id,
            status: if decision.is_immediate() {
                JobStatus::Pending
            } else {
                JobStatus::Delayed
            },
            created_at: created.created_at,
            scheduled_time: decision.scheduled_start,
            immediate: decision.is_immediate(),
            expected_intensity: decision.expected_intensity,
            carbon_savings: decision.carbon_savings,
            message,
        })
    }

    /// `SchedulerError`s are all submission-time validation failures from spec.md
    /// §4.5's rejection list, so they surface the same way a request-shape error does.
    fn map_scheduler_error(err: SchedulerError) -> ApiError {
        ApiError::Validation(err.to_string())
    }

    /// `getById(id)` (spec.md §6).
    pub async fn get_by_id(&self, id: Uuid) -> Result<WorkItem, ApiError> {
        self.store.get(id).await.map_err(|err| match err {
            karbos_store::StoreError::NotFound(id) => ApiError::NotFound(id),
            other => ApiError::Store(other),
        })
    }

    /// `listByUser(userId, limit)` (spec.md §6), clamped to at most 100 rows.
    pub async fn list_by_user(&self, user_id: &str, limit: u64) -> Result<UserJobList, ApiError> {
        let limit = clamp_limit(limit, MAX_LIST_BY_USER_LIMIT);
        let items = self.store.list_by_user(user_id, limit).await?;
        Ok(UserJobList {
            user_id: user_id.to_string(),
            count: items.len(),
            items,
        })
    }

    /// `listAll(limit)` (spec.md §6), clamped to at most 500 rows.
    pub async fn list_all(&self, limit: u64) -> Result<Vec<WorkItem>, ApiError> {
        let limit = clamp_limit(limit, MAX_LIST_ALL_LIMIT);
        Ok(self.store.list_all(limit).await?)
    }

    /// `forecast(region)` (spec.md §6): up to 24 hours of carbon-intensity samples for
    /// `region` (or the deployment default), plus the current reading and the
    /// scheduler's optimal instant over that same window.
    #[instrument(skip(self))]
    pub async fn forecast(&self, region: Option<&str>) -> Result<ForecastResponse, ApiError> {
        let region = region
            .map(str::to_string)
            .unwrap_or_else(|| self.default_region.clone());
        let now = Utc::now();
        let end = now + ChronoDuration::hours(FORECAST_WINDOW_HOURS);

        let raw_samples = self.fetcher.call_range(&region, now, end).await;
        let current = raw_samples.first().map(|s| s.value);

        let optimal_instant = self
            .scheduler
            .schedule(&ScheduleRequest {
                job_id: Uuid::new_v4(),
                region: region.clone(),
                duration: ChronoDuration::hours(1),
                deadline: end + ChronoDuration::seconds(1),
                window_size: Some(ChronoDuration::hours(FORECAST_WINDOW_HOURS)),
                earliest_start: Some(now),
            })
            .await
            .map(|decision| decision.scheduled_start)
            .ok();

        if optimal_instant.is_none() {
            warn!(region, "forecast's internal scheduling probe failed unexpectedly");
        }

        let samples = raw_samples
            .into_iter()
            .map(|s| ForecastSample {
                region: s.region,
                instant: s.instant,
                intensity: s.value,
                unit: karbos_common::IntensitySample::UNIT,
            })
            .collect();

        Ok(ForecastResponse {
            region,
            samples,
            current_intensity: current,
            optimal_instant,
        })
    }
}
