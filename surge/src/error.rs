use surge_core::ValidationError;
use thiserror::Error;

/// Failures that stop a whole run. Per-user failures never surface here.
#[derive(Debug, Error)]
pub enum SurgeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Worker pool failure: {0}")]
    WorkerPool(String),

    #[error("A tokio runtime is required to start the worker pool.")]
    NoRuntime,
}
