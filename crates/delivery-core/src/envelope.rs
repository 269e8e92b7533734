//! Telemetry envelopes as produced upstream and persisted by the store.

use crate::EnvelopeKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known span attribute keys and values.
pub mod attributes {
    /// Marks the type of a span.
    pub const EMB_TYPE: &str = "emb.type";
    /// `emb.type` value of the session root span.
    pub const SESSION_TYPE: &str = "ux.session";
    pub const SESSION_ID: &str = "session.id";
    /// Last heartbeat recorded for a live session, in unix nanos.
    pub const HEARTBEAT_TIME: &str = "emb.heartbeat_time_unix_nano";
    pub const ERROR_CODE: &str = "emb.error_code";
    /// `emb.error_code` value for spans that ended abnormally.
    pub const FAILURE: &str = "failure";
    pub const CRASH_ID: &str = "emb.crash_id";
}

fn default_version() -> String {
    "1".to_string()
}

/// One unit of telemetry ready for storage and transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEnvelope {
    #[serde(default)]
    pub resource: EnvelopeResource,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default = "default_version")]
    pub version: String,
    pub data: EnvelopePayload,
}

impl TelemetryEnvelope {
    pub fn new(resource: EnvelopeResource, data: EnvelopePayload) -> Self {
        Self {
            resource,
            metadata: BTreeMap::new(),
            version: default_version(),
            data,
        }
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.data.kind()
    }
}

/// Description of the app and device that produced the telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum EnvelopePayload {
    Session(SessionPayload),
    Log(LogPayload),
    Crash(CrashPayload),
    Network(NetworkPayload),
}

impl EnvelopePayload {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            EnvelopePayload::Session(_) => EnvelopeKind::Session,
            EnvelopePayload::Log(_) => EnvelopeKind::Log,
            EnvelopePayload::Crash(_) => EnvelopeKind::Crash,
            EnvelopePayload::Network(_) => EnvelopeKind::Network,
        }
    }
}

/// Completed spans plus snapshots of spans still open at write time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPayload {
    #[serde(default)]
    pub spans: Vec<Span>,
    #[serde(default)]
    pub span_snapshots: Vec<Span>,
}

impl SessionPayload {
    /// Number of session root spans across completed spans and snapshots.
    pub fn session_span_count(&self) -> usize {
        self.spans
            .iter()
            .chain(self.span_snapshots.iter())
            .filter(|span| span.is_session_span())
            .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogPayload {
    #[serde(default)]
    pub logs: Vec<LogRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub time_unix_nano: u64,
    pub severity_text: String,
    pub body: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashPayload {
    pub crash_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Report body as captured by the crash handler.
    #[serde(default)]
    pub report: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkPayload {
    #[serde(default)]
    pub spans: Vec<Span>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub time_unix_nano: u64,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

/// A timing span. Snapshots have no end time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub name: String,
    pub start_time_unix_nano: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time_unix_nano: Option<u64>,
    #[serde(default)]
    pub status: SpanStatus,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub events: Vec<SpanEvent>,
}

impl Span {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.key == key)
            .map(|attr| attr.value.as_str())
    }

    /// Insert or replace an attribute.
    pub fn set_attribute(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|attr| attr.key == key) {
            Some(existing) => existing.value = value,
            None => self.attributes.push(Attribute {
                key: key.to_string(),
                value,
            }),
        }
    }

    pub fn is_session_span(&self) -> bool {
        self.attribute(attributes::EMB_TYPE) == Some(attributes::SESSION_TYPE)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.attribute(attributes::SESSION_ID)
    }

    /// Last heartbeat, if the attribute is present and numeric.
    pub fn heartbeat_time_unix_nano(&self) -> Option<u64> {
        self.attribute(attributes::HEARTBEAT_TIME)
            .and_then(|value| value.parse().ok())
    }

    /// End the span abnormally at `end_time_unix_nano` (never before it started).
    pub fn terminate_with_failure(&mut self, end_time_unix_nano: u64) {
        self.end_time_unix_nano = Some(end_time_unix_nano.max(self.start_time_unix_nano));
        self.status = SpanStatus::Error;
        self.set_attribute(attributes::ERROR_CODE, attributes::FAILURE);
    }
}
