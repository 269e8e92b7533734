//! Error types for the payload store.

use delivery_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller-supplied encoder failed
    #[error("Encoding failed for {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;
