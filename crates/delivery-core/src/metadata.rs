//! Envelope kinds, endpoints and the metadata keying every stored payload.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use uuid::Uuid;

/// File name suffix carrying the on-disk format version.
const FILE_SUFFIX: &str = "_v1.json";

/// Kind of telemetry carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Session,
    Log,
    Crash,
    Network,
}

impl EnvelopeKind {
    pub const ALL: [EnvelopeKind; 4] = [
        EnvelopeKind::Crash,
        EnvelopeKind::Session,
        EnvelopeKind::Log,
        EnvelopeKind::Network,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Session => "session",
            EnvelopeKind::Log => "log",
            EnvelopeKind::Crash => "crash",
            EnvelopeKind::Network => "network",
        }
    }

    /// The collector endpoint payloads of this kind are sent to.
    pub fn endpoint(&self) -> Endpoint {
        match self {
            EnvelopeKind::Session => Endpoint::Sessions,
            EnvelopeKind::Log => Endpoint::Logs,
            EnvelopeKind::Crash => Endpoint::Crashes,
            EnvelopeKind::Network => Endpoint::Network,
        }
    }

    /// Lower values are stored and delivered first.
    pub fn default_priority(&self) -> u8 {
        match self {
            EnvelopeKind::Crash => 0,
            EnvelopeKind::Session => 1,
            EnvelopeKind::Log => 2,
            EnvelopeKind::Network => 3,
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvelopeKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(EnvelopeKind::Session),
            "log" => Ok(EnvelopeKind::Log),
            "crash" => Ok(EnvelopeKind::Crash),
            "network" => Ok(EnvelopeKind::Network),
            other => Err(CoreError::InvalidFileName(format!(
                "unknown envelope kind '{other}'"
            ))),
        }
    }
}

/// Collector endpoint, each with its own rate-limit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Sessions,
    Logs,
    Crashes,
    Network,
}

impl Endpoint {
    pub const ALL: [Endpoint; 4] = [
        Endpoint::Sessions,
        Endpoint::Logs,
        Endpoint::Crashes,
        Endpoint::Network,
    ];

    /// Path segment below `/v2/`.
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Sessions => "sessions",
            Endpoint::Logs => "logs",
            Endpoint::Crashes => "crashes",
            Endpoint::Network => "network",
        }
    }

    /// Dense index, usable for per-endpoint arrays.
    pub fn index(&self) -> usize {
        match self {
            Endpoint::Sessions => 0,
            Endpoint::Logs => 1,
            Endpoint::Crashes => 2,
            Endpoint::Network => 3,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Random identifier of the running process, minted once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessIdentifier(String);

impl ProcessIdentifier {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProcessIdentifier {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ProcessIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of one stored payload. Maps one-to-one onto a file name.
///
/// Equality, hashing and ordering cover every field encoded in the file
/// name; `size_hint` is advisory and ignored. Ordering is by priority, then
/// creation time, then uuid, which is the order payloads are delivered in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTelemetryMetadata {
    pub kind: EnvelopeKind,
    pub timestamp_ms: i64,
    pub uuid: String,
    pub process_id: String,
    pub priority: u8,
    /// `false` marks a crash-recovery snapshot that must not be sent as-is.
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_hint: Option<u64>,
}

impl StoredTelemetryMetadata {
    /// New metadata stamped with the current time and a fresh uuid.
    pub fn new(kind: EnvelopeKind, process_id: &ProcessIdentifier, complete: bool) -> Self {
        Self::with_timestamp(
            kind,
            chrono::Utc::now().timestamp_millis(),
            process_id,
            complete,
        )
    }

    pub fn with_timestamp(
        kind: EnvelopeKind,
        timestamp_ms: i64,
        process_id: &ProcessIdentifier,
        complete: bool,
    ) -> Self {
        Self {
            kind,
            timestamp_ms,
            uuid: Uuid::new_v4().simple().to_string(),
            process_id: process_id.as_str().to_string(),
            priority: kind.default_priority(),
            complete,
            size_hint: None,
        }
    }

    /// Same payload identity, completed and owned by `process_id`.
    pub fn resurrected_for(&self, process_id: &ProcessIdentifier) -> Self {
        Self {
            process_id: process_id.as_str().to_string(),
            complete: true,
            ..self.clone()
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.kind.endpoint()
    }

    /// Checks that [`filename`](Self::filename) parses back to this metadata.
    pub fn validate(&self) -> CoreResult<()> {
        for (field, value) in [("process_id", &self.process_id), ("uuid", &self.uuid)] {
            if !is_name_segment(value) {
                return Err(CoreError::InvalidMetadata(format!(
                    "{field} '{value}' must be non-empty ASCII letters, digits or '-'"
                )));
            }
        }
        Ok(())
    }

    /// `p{priority}_{timestamp}_{kind}_{process}_{uuid}_{complete}_v1.json`
    pub fn filename(&self) -> String {
        format!(
            "p{}_{}_{}_{}_{}_{}{}",
            self.priority,
            self.timestamp_ms,
            self.kind,
            self.process_id,
            self.uuid,
            self.complete,
            FILE_SUFFIX
        )
    }

    /// Parse a name produced by [`filename`](Self::filename).
    pub fn from_filename(name: &str) -> CoreResult<Self> {
        let invalid = || CoreError::InvalidFileName(name.to_string());

        let stem = name.strip_suffix(FILE_SUFFIX).ok_or_else(invalid)?;
        let parts: Vec<&str> = stem.split('_').collect();
        let [priority, timestamp, kind, process_id, uuid, complete] = parts.as_slice() else {
            return Err(invalid());
        };

        let priority = priority
            .strip_prefix('p')
            .and_then(|p| p.parse::<u8>().ok())
            .ok_or_else(invalid)?;
        let timestamp_ms = timestamp.parse::<i64>().map_err(|_| invalid())?;
        let kind = kind.parse::<EnvelopeKind>()?;
        let complete = complete.parse::<bool>().map_err(|_| invalid())?;
        if process_id.is_empty() || uuid.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            kind,
            timestamp_ms,
            uuid: uuid.to_string(),
            process_id: process_id.to_string(),
            priority,
            complete,
            size_hint: None,
        })
    }

    fn identity(&self) -> (u8, i64, &str, EnvelopeKind, &str, bool) {
        (
            self.priority,
            self.timestamp_ms,
            &self.uuid,
            self.kind,
            &self.process_id,
            self.complete,
        )
    }
}

fn is_name_segment(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

impl PartialEq for StoredTelemetryMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for StoredTelemetryMetadata {}

impl Hash for StoredTelemetryMetadata {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for StoredTelemetryMetadata {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StoredTelemetryMetadata {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.timestamp_ms.cmp(&other.timestamp_ms))
            .then_with(|| self.uuid.cmp(&other.uuid))
            .then_with(|| self.kind.as_str().cmp(other.kind.as_str()))
            .then_with(|| self.process_id.cmp(&other.process_id))
            .then(self.complete.cmp(&other.complete))
    }
}

impl fmt::Display for StoredTelemetryMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filename())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process() -> ProcessIdentifier {
        ProcessIdentifier::from("0a1b2c")
    }

    #[test]
    fn test_filename_round_trip() {
        let meta = StoredTelemetryMetadata::with_timestamp(EnvelopeKind::Log, 1700, &process(), true);

        let name = meta.filename();
        assert!(name.starts_with("p2_1700_log_0a1b2c_"));
        assert!(name.ends_with("_true_v1.json"));

        let parsed = StoredTelemetryMetadata::from_filename(&name).unwrap();
        assert_eq!(parsed, meta);
        assert_eq!(parsed.filename(), name);
    }

    #[test]
    fn test_separator_in_a_field_fails_validation() {
        let meta = StoredTelemetryMetadata::with_timestamp(
            EnvelopeKind::Log,
            1700,
            &ProcessIdentifier::from("host_app"),
            true,
        );
        assert!(matches!(meta.validate(), Err(CoreError::InvalidMetadata(_))));
        assert!(StoredTelemetryMetadata::from_filename(&meta.filename()).is_err());

        let mut bad_uuid =
            StoredTelemetryMetadata::with_timestamp(EnvelopeKind::Log, 1700, &process(), true);
        bad_uuid.uuid = "a_b".to_string();
        assert!(bad_uuid.validate().is_err());

        for value in ["", "../up", "a/b"] {
            let mut m =
                StoredTelemetryMetadata::with_timestamp(EnvelopeKind::Log, 1700, &process(), true);
            m.process_id = value.to_string();
            assert!(m.validate().is_err(), "{value:?} should be rejected");
        }
    }

    #[test]
    fn test_valid_metadata_round_trips_through_its_file_name() {
        let fresh = StoredTelemetryMetadata::new(
            EnvelopeKind::Network,
            &ProcessIdentifier::generate(),
            false,
        );
        fresh.validate().unwrap();
        assert_eq!(StoredTelemetryMetadata::from_filename(&fresh.filename()).unwrap(), fresh);

        let legacy = StoredTelemetryMetadata::with_timestamp(
            EnvelopeKind::Crash,
            -5,
            &ProcessIdentifier::from("0a1b-2c"),
            true,
        );
        legacy.validate().unwrap();
        assert_eq!(StoredTelemetryMetadata::from_filename(&legacy.filename()).unwrap(), legacy);
    }

    #[test]
    fn test_from_filename_rejects_foreign_names() {
        for name in [
            "notes.txt",
            "p1_1700_session_abc_v1.json",
            "px_1700_session_abc_def_true_v1.json",
            "p1_1700_trace_abc_def_true_v1.json",
            "p1_1700_session_abc_def_maybe_v1.json",
            "p1_1700_session__def_true_v1.json",
        ] {
            assert!(
                StoredTelemetryMetadata::from_filename(name).is_err(),
                "{name} should not parse"
            );
        }
    }

    #[test]
    fn test_ordering_is_priority_then_timestamp() {
        let log = StoredTelemetryMetadata::with_timestamp(EnvelopeKind::Log, 10, &process(), true);
        let late_crash =
            StoredTelemetryMetadata::with_timestamp(EnvelopeKind::Crash, 99, &process(), true);
        let early_session =
            StoredTelemetryMetadata::with_timestamp(EnvelopeKind::Session, 5, &process(), true);
        let late_session =
            StoredTelemetryMetadata::with_timestamp(EnvelopeKind::Session, 50, &process(), true);

        let mut all = vec![log.clone(), late_session.clone(), late_crash.clone(), early_session.clone()];
        all.sort();

        assert_eq!(all, vec![late_crash, early_session, late_session, log]);
    }

    #[test]
    fn test_identity_ignores_size_hint() {
        let meta = StoredTelemetryMetadata::with_timestamp(EnvelopeKind::Session, 1, &process(), false);
        let mut sized = meta.clone();
        sized.size_hint = Some(4096);

        assert_eq!(meta, sized);
        let set: std::collections::HashSet<_> = [meta, sized].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_resurrected_metadata_gets_a_new_file_name() {
        let old = StoredTelemetryMetadata::with_timestamp(EnvelopeKind::Session, 1, &process(), false);
        let current = ProcessIdentifier::generate();

        let revived = old.resurrected_for(&current);

        assert!(revived.complete);
        assert_eq!(revived.uuid, old.uuid);
        assert_eq!(revived.timestamp_ms, old.timestamp_ms);
        assert_eq!(revived.process_id, current.as_str());
        assert_ne!(revived.filename(), old.filename());
    }

    #[test]
    fn test_each_kind_has_its_own_endpoint() {
        let mut seen = [false; 4];
        for kind in EnvelopeKind::ALL {
            let endpoint = kind.endpoint();
            assert_eq!(Endpoint::ALL[endpoint.index()], endpoint);
            assert!(!seen[endpoint.index()], "{} shares an endpoint", kind);
            seen[endpoint.index()] = true;
            assert_eq!(kind.as_str().parse::<EnvelopeKind>().unwrap(), kind);
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_process_identifier_is_hex_without_dashes() {
        let id = ProcessIdentifier::generate();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
