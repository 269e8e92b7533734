//! Core error types for telemetry delivery.

use thiserror::Error;

/// Core error type for configuration, paths and metadata handling.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Path error (e.g., home directory not found)
    #[error("Path error: {0}")]
    Path(String),

    /// A payload file name that does not describe stored telemetry
    #[error("Invalid payload file name: {0}")]
    InvalidFileName(String),

    /// Metadata that cannot be encoded into a payload file name
    #[error("Invalid payload metadata: {0}")]
    InvalidMetadata(String),
}

/// Result type alias using CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
