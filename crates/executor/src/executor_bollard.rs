//! `bollard`-backed [`Executor`] (spec.md §4.9).
//!
//! `bollard` is the idiomatic async Docker Engine API client for Rust, chosen here as
//! the concrete container runtime. `ensure_image` drains `create_image`'s progress stream to
//! completion; `run` derives `HostConfig.memory`/`cpu_quota`/`cpu_period` from the
//! configured resources, starts the container, and races log collection against
//! `tokio::time::timeout(deadline, ...)`. Cleanup (`remove_container` with `force:
//! true`) always runs on every exit path, itself bounded by a 10s timeout, modeled as a
//! guard executed in a `finally`-shaped block before the function returns.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{instrument, warn};

use crate::error::ExecutorError;
use crate::executor::{ExecutionOutcome, ExecutionSpec, Executor};

/// Upper bound on how long container removal itself may take, per spec.md §4.9.
const CLEANUP_DEADLINE: Duration = Duration::from_secs(10);

/// CPU accounting period bollard/Docker expects `cpu_quota` to be expressed against.
const CPU_PERIOD_MICROS: i64 = 100_000;

pub struct BollardExecutor {
    docker: Docker,
}

impl BollardExecutor {
    #[must_use]
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect to the local Docker daemon using its default socket/TLS configuration.
    ///
    /// # Errors
    /// Returns an error if the daemon is unreachable.
    pub fn connect_local() -> Result<Self, bollard::errors::Error> {
        Ok(Self::new(Docker::connect_with_local_defaults()?))
    }

    async fn cleanup(&self, container_id: &str) {
        let result = tokio::time::timeout(
            CLEANUP_DEADLINE,
            self.docker.remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            ),
        )
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(container_id, %err, "failed to remove container"),
            Err(_) => warn!(container_id, "container removal exceeded its own deadline"),
        }
    }
}

#[async_trait]
impl Executor for BollardExecutor {
    #[instrument(skip(self))]
    async fn ensure_image(&self, image: &str) -> Result<(), ExecutorError> {
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(progress) = stream.next().await {
            progress.map_err(|source| ExecutorError::ImagePull {
                image: image.to_string(),
                source,
            })?;
        }

        Ok(())
    }

    #[instrument(skip(self, spec), fields(job_id = %spec.job_id))]
    async fn run(&self, spec: &ExecutionSpec) -> Result<ExecutionOutcome, ExecutorError> {
        self.ensure_image(&spec.docker_image).await?;

        let cpu_quota = (spec.cpu_fraction * CPU_PERIOD_MICROS as f64).round() as i64;
        let host_config = HostConfig {
            memory: Some(spec.memory_bytes),
            cpu_period: Some(CPU_PERIOD_MICROS),
            cpu_quota: Some(cpu_quota.max(1000)),
            ..Default::default()
        };

        let container_name = format!("karbos-{}", spec.job_id);
        let config = Config {
            image: Some(spec.docker_image.clone()),
            cmd: Some(spec.argv.clone()),
            host_config: Some(host_config),
            labels: Some(HashMap::from([(
                "karbos.job_id".to_string(),
                spec.job_id.to_string(),
            )])),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(ExecutorError::Create)?;

        let container_id = created.id;

        let started_at = chrono::Utc::now();
        if let Err(source) = self.docker.start_container::<String>(&container_id, None).await {
            self.cleanup(&container_id).await;
            return Err(ExecutorError::Start(container_id, source));
        }

        let timeout_duration = (spec.deadline - started_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0));

        let outcome = tokio::time::timeout(timeout_duration, self.collect(&container_id)).await;

        self.cleanup(&container_id).await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::DeadlineExceeded(container_id)),
        }
    }
}

impl BollardExecutor {
    async fn collect(&self, container_id: &str) -> Result<ExecutionOutcome, ExecutorError> {
        let started_at = chrono::Utc::now();

        let mut logs_stream = self.docker.logs(
            container_id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            }),
        );

        let mut stdout = String::new();
        let mut stderr = String::new();
        while let Some(chunk) = logs_stream.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message } | LogOutput::Console { message }) => {
                    stdout.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdErr { message }) => {
                    stderr.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdIn { .. }) => {}
                Err(err) => return Err(ExecutorError::Logs(container_id.to_string(), err)),
            }
        }

        // spec.md §4.9: "interleaves standard-out and standard-error with a single
        // delimiter when both are non-empty."
        let captured_output = if stdout.is_empty() || stderr.is_empty() {
            format!("{stdout}{stderr}")
        } else {
            format!("{stdout}\n---\n{stderr}")
        };

        let mut wait_stream = self.docker.wait_container(
            container_id,
            None::<WaitContainerOptions<String>>,
        );

        let exit_code = match wait_stream.next().await {
            Some(Ok(response)) => Some(response.status_code as i32),
            Some(Err(err)) => {
                return Ok(ExecutionOutcome {
                    exit_code: None,
                    captured_output,
                    error_message: Some(err.to_string()),
                    runtime_seconds: (chrono::Utc::now() - started_at).num_seconds(),
                });
            }
            None => None,
        };

        Ok(ExecutionOutcome {
            exit_code,
            captured_output,
            error_message: None,
            runtime_seconds: (chrono::Utc::now() - started_at).num_seconds(),
        })
    }
}
