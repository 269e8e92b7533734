//! Error types for building the request executor.

use delivery_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    /// HTTP client construction failed
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Header value could not be encoded
    #[error("Invalid header value for {0}")]
    InvalidHeader(&'static str),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type alias using ExecutionError.
pub type ExecutionResult<T> = Result<T, ExecutionError>;
