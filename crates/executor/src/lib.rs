//! karbos-executor — C9 Executor: containerized job execution.

pub mod error;
pub mod executor;
pub mod executor_bollard;
pub mod executor_fake;

pub use error::ExecutorError;
pub use executor::{ExecutionOutcome, ExecutionSpec, Executor};
pub use executor_bollard::BollardExecutor;
pub use executor_fake::FakeExecutor;
