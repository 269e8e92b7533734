//! Side channel for failures caught inside background workers.
//!
//! Workers never propagate errors to the host application. Anything they
//! catch is reported here and the worker moves on to its next task.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::error;

/// Class of a caught internal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalErrorKind {
    /// Serializing or storing an envelope handed to intake failed.
    IntakeFailure,
    /// A cached session could not be resurrected.
    ResurrectionFailure,
    /// The collector rejected a payload permanently.
    DeliveryFailure,
    /// A payload store operation failed outside of intake.
    StorageFailure,
}

impl fmt::Display for InternalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InternalErrorKind::IntakeFailure => "intake_failure",
            InternalErrorKind::ResurrectionFailure => "resurrection_failure",
            InternalErrorKind::DeliveryFailure => "delivery_failure",
            InternalErrorKind::StorageFailure => "storage_failure",
        };
        f.write_str(name)
    }
}

/// Receiver of internal failures.
pub trait InternalErrorHandler: Send + Sync {
    fn track(&self, kind: InternalErrorKind, message: String);
}

/// Shared handle passed to every component.
pub type ErrorHandlerHandle = Arc<dyn InternalErrorHandler>;

/// Logs every failure at `error!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorHandler;

impl InternalErrorHandler for LoggingErrorHandler {
    fn track(&self, kind: InternalErrorKind, message: String) {
        error!(kind = %kind, "Internal delivery error: {}", message);
    }
}

/// A recorded failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalError {
    pub kind: InternalErrorKind,
    pub message: String,
}

/// Keeps failures in memory for inspection.
#[derive(Debug, Default)]
pub struct RecordingErrorHandler {
    entries: Mutex<Vec<InternalError>>,
}

impl RecordingErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<InternalError> {
        self.entries.lock().clone()
    }

    pub fn count(&self, kind: InternalErrorKind) -> usize {
        self.entries.lock().iter().filter(|e| e.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl InternalErrorHandler for RecordingErrorHandler {
    fn track(&self, kind: InternalErrorKind, message: String) {
        self.entries.lock().push(InternalError { kind, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_handler_counts_by_kind() {
        let handler = RecordingErrorHandler::new();
        assert!(handler.is_empty());

        handler.track(InternalErrorKind::IntakeFailure, "disk full".to_string());
        handler.track(InternalErrorKind::DeliveryFailure, "400".to_string());
        handler.track(InternalErrorKind::IntakeFailure, "disk full".to_string());

        assert_eq!(handler.len(), 3);
        assert_eq!(handler.count(InternalErrorKind::IntakeFailure), 2);
        assert_eq!(handler.count(InternalErrorKind::ResurrectionFailure), 0);
        assert_eq!(handler.entries()[1].message, "400");
    }

    #[test]
    fn test_handlers_are_usable_as_trait_objects() {
        let recording = Arc::new(RecordingErrorHandler::new());
        let handles: Vec<ErrorHandlerHandle> = vec![Arc::new(LoggingErrorHandler), recording.clone()];

        for handle in &handles {
            handle.track(InternalErrorKind::StorageFailure, "rename failed".to_string());
        }

        assert_eq!(recording.count(InternalErrorKind::StorageFailure), 1);
    }
}
