//! Error types for intake.

use delivery_core::EnvelopeKind;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IntakeError {
    /// Intake was shut down and accepts no more work
    #[error("Intake is shut down")]
    ShutDown,

    /// Metadata does not describe the envelope it accompanies
    #[error("Metadata kind {metadata} does not match envelope kind {envelope}")]
    KindMismatch {
        metadata: EnvelopeKind,
        envelope: EnvelopeKind,
    },

    /// Metadata that would produce an unlistable payload file
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
}

/// Result type alias using IntakeError.
pub type IntakeResult<T> = Result<T, IntakeError>;
