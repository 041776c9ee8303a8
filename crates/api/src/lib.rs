//! karbos-api — the submission, inspection, and forecast operations of spec.md §6,
//! wired from C4 (CarbonFetcher) and C5 (Scheduler) through to C6 (JobStore) and C7
//! (DualQueue). The HTTP routing layer a deployment fronts this with is out of scope;
//! this crate implements the operations a transport would dispatch to.

pub mod error;
pub mod forecast_source;
pub mod service;
pub mod types;

pub use error::ApiError;
pub use forecast_source::FetcherForecastSource;
pub use service::KarbosService;
pub use types::{
    ForecastResponse, ForecastSample, SubmitRequest, SubmitResponse, UserJobList,
    MAX_LIST_ALL_LIMIT, MAX_LIST_BY_USER_LIMIT,
};
