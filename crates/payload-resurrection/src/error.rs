//! Error types for resurrection.

use delivery_core::EnvelopeKind;
use intake_queue::IntakeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResurrectionError {
    /// The entry vanished or was empty when read
    #[error("Cached payload is missing or unreadable")]
    Missing,

    #[error("Cached payload is not a valid envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Cached payload is a {0} envelope, not a session")]
    NotASession(EnvelopeKind),

    /// A resurrectable session has exactly one root span
    #[error("Expected exactly one session span, found {0}")]
    SessionSpanCount(usize),

    #[error("Intake rejected resurrected session: {0}")]
    Intake(#[from] IntakeError),
}

impl ResurrectionError {
    /// Structurally unusable data, as opposed to an I/O or hand-off failure.
    pub fn is_unresurrectable(&self) -> bool {
        matches!(
            self,
            ResurrectionError::NotASession(_) | ResurrectionError::SessionSpanCount(_)
        )
    }
}

/// Result type alias using ResurrectionError.
pub type ResurrectionResult<T> = Result<T, ResurrectionError>;
