//! In-process [`Executor`] test double — no Docker daemon required.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::ExecutorError;
use crate::executor::{ExecutionOutcome, ExecutionSpec, Executor};

/// Always succeeds after an optional simulated delay, recording every spec it ran.
pub struct FakeExecutor {
    delay: std::time::Duration,
    ran: Mutex<Vec<ExecutionSpec>>,
}

impl FakeExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            delay: std::time::Duration::ZERO,
            ran: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_delay(delay: std::time::Duration) -> Self {
        Self {
            delay,
            ran: Mutex::new(Vec::new()),
        }
    }

    pub async fn ran_specs(&self) -> Vec<ExecutionSpec> {
        self.ran.lock().await.clone()
    }
}

impl Default for FakeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn ensure_image(&self, _image: &str) -> Result<(), ExecutorError> {
        Ok(())
    }

    async fn run(&self, spec: &ExecutionSpec) -> Result<ExecutionOutcome, ExecutorError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.ran.lock().await.push(spec.clone());
        Ok(ExecutionOutcome {
            exit_code: Some(0),
            captured_output: String::new(),
            error_message: None,
            runtime_seconds: self.delay.as_secs() as i64,
        })
    }
}
