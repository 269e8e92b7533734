//! Core types, configuration, and utilities for telemetry delivery.
//!
//! Every other delivery crate builds on the types defined here: the
//! envelope data model, the metadata that names stored payloads, the
//! configuration and path layout, the internal-error side channel and the
//! connectivity feed.

mod config;
mod connectivity;
mod crash;
pub mod envelope;
mod error;
mod internal_error;
mod logging;
mod metadata;
mod paths;

pub use config::{
    DeliveryConfig, RateLimitPolicy, RetryPolicy, BASE_URL_ENV, DEFAULT_LOG_LEVEL, LOG_LEVEL_ENV,
};
pub use connectivity::{
    connectivity_channel, ConnectivityFeed, ConnectivityPublisher, NetworkStatus,
};
pub use crash::{NativeCrashData, NativeCrashSource, StaticCrashSource};
pub use envelope::{
    Attribute, CrashPayload, EnvelopePayload, EnvelopeResource, LogPayload, LogRecord,
    NetworkPayload, SessionPayload, Span, SpanEvent, SpanStatus, TelemetryEnvelope,
};
pub use error::{CoreError, CoreResult};
pub use internal_error::{
    ErrorHandlerHandle, InternalError, InternalErrorHandler, InternalErrorKind,
    LoggingErrorHandler, RecordingErrorHandler,
};
pub use logging::{init_logging, LOG_FILE_ENV, LOG_STDERR_ENV};
pub use metadata::{EnvelopeKind, Endpoint, ProcessIdentifier, StoredTelemetryMetadata};
pub use paths::Paths;

/// Notified by intake each time a payload has been durably stored.
pub trait PayloadIntakeListener: Send + Sync {
    fn on_payload_intake(&self);
}
