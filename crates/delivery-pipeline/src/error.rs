//! Error types for pipeline startup.

use delivery_core::CoreError;
use payload_store::StoreError;
use request_execution::ExecutionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Core(#[from] CoreError),

    #[error("Payload store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Execution(#[from] ExecutionError),

    /// A startup task panicked or was cancelled
    #[error("Startup task failed: {0}")]
    Startup(#[from] tokio::task::JoinError),
}

/// Result type alias using PipelineError.
pub type PipelineResult<T> = Result<T, PipelineError>;
