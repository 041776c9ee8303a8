//! C9 Executor — containerized job execution capability (spec.md §4.9).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ExecutorError;

/// Everything the executor needs to run one job's container.
#[derive(Debug, Clone)]
pub struct ExecutionSpec {
    pub job_id: Uuid,
    pub docker_image: String,
    pub argv: Vec<String>,
    pub deadline: DateTime<Utc>,
    /// Fraction of a CPU core, translated to `HostConfig.cpu_quota`/`cpu_period`.
    pub cpu_fraction: f64,
    pub memory_bytes: i64,
}

/// The result of one container run, whatever the outcome.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_code: Option<i32>,
    pub captured_output: String,
    pub error_message: Option<String>,
    pub runtime_seconds: i64,
}

impl ExecutionOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a containerized job to completion or until its deadline. Every implementation
/// guarantees the container is removed on every exit path, including a deadline
/// timeout, per spec.md §4.9.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn ensure_image(&self, image: &str) -> Result<(), ExecutorError>;

    async fn run(&self, spec: &ExecutionSpec) -> Result<ExecutionOutcome, ExecutorError>;
}
