//! karbos-scheduler — C5 Scheduler: the sliding-window carbon-minimizing decision.

pub mod config;
pub mod error;
pub mod request;
pub mod scheduler;
pub mod source;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use request::ScheduleRequest;
pub use scheduler::Scheduler;
pub use source::IntensityForecastSource;
