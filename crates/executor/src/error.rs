//! Errors for the container-execution capability.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to pull image {image}: {source}")]
    ImagePull {
        image: String,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("failed to create container: {0}")]
    Create(#[source] bollard::errors::Error),

    #[error("failed to start container {0}: {1}")]
    Start(String, #[source] bollard::errors::Error),

    #[error("execution of container {0} exceeded its deadline")]
    DeadlineExceeded(String),

    #[error("failed to collect logs for container {0}: {1}")]
    Logs(String, #[source] bollard::errors::Error),

    #[error("failed to remove container {0}: {1}")]
    Cleanup(String, #[source] bollard::errors::Error),
}
