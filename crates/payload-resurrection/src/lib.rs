//! Payload resurrection.
//!
//! Sessions are cached periodically while they run, marked incomplete. If the
//! process dies, those snapshots are the only record of the session. At the
//! next launch [`PayloadResurrectionService`] turns each of them into a
//! finished, failed session and hands it back to intake for delivery.
//!
//! An entry is removed only after its rebuilt envelope was accepted by
//! intake. Anything that cannot be rebuilt stays on disk and is reported
//! through the internal error channel.

mod error;

pub use error::{ResurrectionError, ResurrectionResult};

use delivery_core::envelope::attributes;
use delivery_core::{
    EnvelopeKind, EnvelopePayload, ErrorHandlerHandle, InternalErrorKind, NativeCrashData,
    NativeCrashSource, ProcessIdentifier, SessionPayload, Span, StoredTelemetryMetadata,
    TelemetryEnvelope,
};
use intake_queue::TelemetryIntake;
use payload_store::PayloadStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one resurrection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResurrectionReport {
    /// Handed to intake and removed from the cache.
    pub resurrected: usize,
    /// Structurally unusable, left cached.
    pub skipped: usize,
    /// Unreadable or rejected by intake, left cached.
    pub failed: usize,
}

/// Rebuild a cached, unfinished session as a terminated one.
///
/// The root session span ends at its last heartbeat (or its start when no
/// heartbeat was recorded) with a failure status. Every open snapshot
/// becomes a failed span ending at the same time, unless a completed span
/// with the same id is already present. A crash recorded for this session
/// is linked on the root span.
pub fn resurrect_session(
    envelope: TelemetryEnvelope,
    crash: Option<&NativeCrashData>,
) -> ResurrectionResult<TelemetryEnvelope> {
    let TelemetryEnvelope {
        resource,
        metadata,
        version,
        data,
    } = envelope;
    let payload = match data {
        EnvelopePayload::Session(payload) => payload,
        other => return Err(ResurrectionError::NotASession(other.kind())),
    };

    let count = payload.session_span_count();
    if count != 1 {
        return Err(ResurrectionError::SessionSpanCount(count));
    }
    let end_time = payload
        .spans
        .iter()
        .chain(payload.span_snapshots.iter())
        .find(|span| span.is_session_span())
        .map(|span| span.heartbeat_time_unix_nano().unwrap_or(span.start_time_unix_nano))
        .ok_or(ResurrectionError::SessionSpanCount(0))?;

    let SessionPayload {
        mut spans,
        span_snapshots,
    } = payload;
    let completed: HashSet<String> = spans.iter().map(|span| span.span_id.clone()).collect();
    for snapshot in span_snapshots {
        if completed.contains(&snapshot.span_id) {
            debug!(span_id = %snapshot.span_id, "Dropping snapshot of already completed span");
            continue;
        }
        spans.push(snapshot);
    }

    for span in spans.iter_mut() {
        if span.is_session_span() {
            terminate_session_span(span, end_time, crash);
        } else if span.end_time_unix_nano.is_none() {
            span.terminate_with_failure(end_time);
        }
    }

    Ok(TelemetryEnvelope {
        resource,
        metadata,
        version,
        data: EnvelopePayload::Session(SessionPayload {
            spans,
            span_snapshots: Vec::new(),
        }),
    })
}

fn terminate_session_span(span: &mut Span, end_time: u64, crash: Option<&NativeCrashData>) {
    span.terminate_with_failure(end_time);
    let Some(crash) = crash else {
        return;
    };
    if span.session_id() == Some(crash.session_id.as_str()) {
        span.set_attribute(attributes::CRASH_ID, crash.native_crash_id.clone());
    }
}

/// Scans the store once at startup for sessions left behind by earlier
/// processes.
pub struct PayloadResurrectionService {
    intake: Arc<dyn TelemetryIntake>,
    store: Arc<dyn PayloadStore>,
    crash_source: Option<Arc<dyn NativeCrashSource>>,
    process_id: ProcessIdentifier,
    errors: ErrorHandlerHandle,
}

impl PayloadResurrectionService {
    pub fn new(
        intake: Arc<dyn TelemetryIntake>,
        store: Arc<dyn PayloadStore>,
        crash_source: Option<Arc<dyn NativeCrashSource>>,
        process_id: ProcessIdentifier,
        errors: ErrorHandlerHandle,
    ) -> Self {
        Self {
            intake,
            store,
            crash_source,
            process_id,
            errors,
        }
    }

    /// Resurrect every incomplete session written by another process.
    ///
    /// Blocking: reads and deletes files.
    pub fn resurrect_old_payloads(&self) -> ResurrectionReport {
        let crash = self
            .crash_source
            .as_ref()
            .and_then(|source| source.latest_crash());
        let mut report = ResurrectionReport::default();

        let candidates: Vec<_> = self
            .store
            .list_by_kind(EnvelopeKind::Session)
            .into_iter()
            .filter(|metadata| !metadata.complete && metadata.process_id != self.process_id.as_str())
            .collect();
        if candidates.is_empty() {
            debug!("No cached sessions to resurrect");
            return report;
        }

        for metadata in candidates {
            match self.resurrect_entry(&metadata, crash.as_ref()) {
                Ok(()) => report.resurrected += 1,
                Err(err) => {
                    warn!(payload = %metadata, error = %err, "Left cached session in place");
                    self.errors.track(
                        InternalErrorKind::ResurrectionFailure,
                        format!("{}: {}", metadata, err),
                    );
                    if err.is_unresurrectable() {
                        report.skipped += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            resurrected = report.resurrected,
            skipped = report.skipped,
            failed = report.failed,
            "Resurrection finished"
        );
        report
    }

    fn resurrect_entry(
        &self,
        metadata: &StoredTelemetryMetadata,
        crash: Option<&NativeCrashData>,
    ) -> ResurrectionResult<()> {
        let bytes = self.store.load(metadata).ok_or(ResurrectionError::Missing)?;
        let envelope: TelemetryEnvelope = serde_json::from_slice(&bytes)?;
        let envelope = resurrect_session(envelope, crash)?;

        self.intake
            .take(envelope, metadata.resurrected_for(&self.process_id))?;

        if let Err(err) = self.store.delete(metadata) {
            // Handed off already; a stale copy is resurrected again next launch.
            self.errors.track(
                InternalErrorKind::StorageFailure,
                format!("failed to delete resurrected {}: {}", metadata, err),
            );
        }
        info!(payload = %metadata, "Resurrected cached session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delivery_core::{
        Attribute, EnvelopeResource, LogPayload, RecordingErrorHandler, SpanStatus,
    };
    use intake_queue::{IntakeError, IntakeResult};
    use parking_lot::Mutex;
    use payload_store::FsPayloadStore;
    use std::io::Write;
    use tempfile::TempDir;

    const SESSION: &str = "sess-1";

    fn span(id: &str, start: u64, end: Option<u64>) -> Span {
        Span {
            trace_id: "trace".to_string(),
            span_id: id.to_string(),
            parent_span_id: None,
            name: id.to_string(),
            start_time_unix_nano: start,
            end_time_unix_nano: end,
            status: SpanStatus::Unset,
            attributes: Vec::new(),
            events: Vec::new(),
        }
    }

    fn session_span(heartbeat: Option<u64>) -> Span {
        let mut root = span("root", 1_000, None);
        root.attributes.push(Attribute {
            key: attributes::EMB_TYPE.to_string(),
            value: attributes::SESSION_TYPE.to_string(),
        });
        root.set_attribute(attributes::SESSION_ID, SESSION);
        if let Some(heartbeat) = heartbeat {
            root.set_attribute(attributes::HEARTBEAT_TIME, heartbeat.to_string());
        }
        root
    }

    fn session(spans: Vec<Span>, snapshots: Vec<Span>) -> TelemetryEnvelope {
        TelemetryEnvelope::new(
            EnvelopeResource::default(),
            EnvelopePayload::Session(SessionPayload {
                spans,
                span_snapshots: snapshots,
            }),
        )
    }

    fn spans_of(envelope: &TelemetryEnvelope) -> &SessionPayload {
        match &envelope.data {
            EnvelopePayload::Session(payload) => payload,
            other => panic!("expected session, got {:?}", other.kind()),
        }
    }

    fn crash(session_id: &str) -> NativeCrashData {
        NativeCrashData {
            native_crash_id: "crash-9".to_string(),
            session_id: session_id.to_string(),
            timestamp_ms: 5,
        }
    }

    #[test]
    fn test_open_spans_are_terminated_at_heartbeat() {
        let envelope = session(
            vec![span("done", 1_100, Some(1_200))],
            vec![session_span(Some(5_000)), span("open", 1_300, None)],
        );

        let rebuilt = resurrect_session(envelope, None).unwrap();
        let payload = spans_of(&rebuilt);

        assert!(payload.span_snapshots.is_empty());
        assert_eq!(payload.spans.len(), 3);
        for span in &payload.spans {
            assert!(span.end_time_unix_nano.is_some());
        }
        let root = payload.spans.iter().find(|s| s.is_session_span()).unwrap();
        assert_eq!(root.end_time_unix_nano, Some(5_000));
        assert_eq!(root.status, SpanStatus::Error);
        assert_eq!(root.attribute(attributes::ERROR_CODE), Some(attributes::FAILURE));
        let open = payload.spans.iter().find(|s| s.span_id == "open").unwrap();
        assert_eq!(open.end_time_unix_nano, Some(5_000));
        assert_eq!(open.status, SpanStatus::Error);
        let done = payload.spans.iter().find(|s| s.span_id == "done").unwrap();
        assert_eq!(done.end_time_unix_nano, Some(1_200));
        assert_eq!(done.status, SpanStatus::Unset);
    }

    #[test]
    fn test_missing_heartbeat_ends_session_at_start() {
        let envelope = session(Vec::new(), vec![session_span(None)]);

        let rebuilt = resurrect_session(envelope, None).unwrap();

        assert_eq!(spans_of(&rebuilt).spans[0].end_time_unix_nano, Some(1_000));
    }

    #[test]
    fn test_snapshot_of_completed_span_is_dropped() {
        let envelope = session(
            vec![span("child", 1_100, Some(1_150))],
            vec![session_span(Some(2_000)), span("child", 1_100, None)],
        );

        let rebuilt = resurrect_session(envelope, None).unwrap();
        let payload = spans_of(&rebuilt);

        let children: Vec<_> = payload.spans.iter().filter(|s| s.span_id == "child").collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].end_time_unix_nano, Some(1_150));
    }

    #[test]
    fn test_matching_crash_is_linked() {
        let envelope = session(Vec::new(), vec![session_span(Some(2_000))]);
        let rebuilt = resurrect_session(envelope, Some(&crash(SESSION))).unwrap();
        assert_eq!(
            spans_of(&rebuilt).spans[0].attribute(attributes::CRASH_ID),
            Some("crash-9")
        );

        let envelope = session(Vec::new(), vec![session_span(Some(2_000))]);
        let rebuilt = resurrect_session(envelope, Some(&crash("other"))).unwrap();
        assert_eq!(spans_of(&rebuilt).spans[0].attribute(attributes::CRASH_ID), None);
    }

    #[test]
    fn test_session_span_count_must_be_one() {
        let none = session(vec![span("a", 1, Some(2))], Vec::new());
        assert!(matches!(
            resurrect_session(none, None),
            Err(ResurrectionError::SessionSpanCount(0))
        ));

        let two = session(vec![session_span(None)], vec![session_span(None)]);
        assert!(matches!(
            resurrect_session(two, None),
            Err(ResurrectionError::SessionSpanCount(2))
        ));
    }

    #[test]
    fn test_non_session_envelope_rejected() {
        let log = TelemetryEnvelope::new(
            EnvelopeResource::default(),
            EnvelopePayload::Log(LogPayload::default()),
        );
        assert!(matches!(
            resurrect_session(log, None),
            Err(ResurrectionError::NotASession(EnvelopeKind::Log))
        ));
    }

    struct RecordingIntake {
        taken: Mutex<Vec<(TelemetryEnvelope, StoredTelemetryMetadata)>>,
        reject: bool,
    }

    impl TelemetryIntake for RecordingIntake {
        fn take(&self, envelope: TelemetryEnvelope, metadata: StoredTelemetryMetadata) -> IntakeResult<()> {
            if self.reject {
                return Err(IntakeError::ShutDown);
            }
            self.taken.lock().push((envelope, metadata));
            Ok(())
        }
    }

    struct Harness {
        _dir: TempDir,
        store: Arc<FsPayloadStore>,
        intake: Arc<RecordingIntake>,
        errors: Arc<RecordingErrorHandler>,
        service: PayloadResurrectionService,
    }

    fn harness(reject: bool, crash: Option<NativeCrashData>) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsPayloadStore::new(dir.path()).unwrap());
        let intake = Arc::new(RecordingIntake {
            taken: Mutex::new(Vec::new()),
            reject,
        });
        let errors = Arc::new(RecordingErrorHandler::new());
        let crash_source: Option<Arc<dyn NativeCrashSource>> =
            Some(Arc::new(delivery_core::StaticCrashSource(crash)));
        let service = PayloadResurrectionService::new(
            intake.clone(),
            store.clone(),
            crash_source,
            ProcessIdentifier::from("current"),
            errors.clone(),
        );
        Harness {
            _dir: dir,
            store,
            intake,
            errors,
            service,
        }
    }

    fn cache(h: &Harness, envelope: &TelemetryEnvelope, process: &str, complete: bool) -> StoredTelemetryMetadata {
        let metadata = StoredTelemetryMetadata::new(
            envelope.kind(),
            &ProcessIdentifier::from(process),
            complete,
        );
        h.store
            .store(&metadata, &mut |w| serde_json::to_writer(w, envelope).map_err(Into::into))
            .unwrap();
        metadata
    }

    #[test]
    fn test_resurrects_sessions_from_previous_process() {
        let h = harness(false, Some(crash(SESSION)));
        let envelope = session(vec![span("a", 1_100, Some(1_200))], vec![session_span(Some(3_000))]);
        let original = cache(&h, &envelope, "previous", false);

        let report = h.service.resurrect_old_payloads();

        assert_eq!(report, ResurrectionReport { resurrected: 1, skipped: 0, failed: 0 });
        assert!(h.store.load(&original).is_none());
        let taken = h.intake.taken.lock();
        let (rebuilt, metadata) = &taken[0];
        assert_eq!(metadata.uuid, original.uuid);
        assert_eq!(metadata.process_id, "current");
        assert!(metadata.complete);
        let root = spans_of(rebuilt).spans.iter().find(|s| s.is_session_span()).unwrap();
        assert_eq!(root.attribute(attributes::CRASH_ID), Some("crash-9"));
        assert!(h.errors.is_empty());
    }

    #[test]
    fn test_ignores_complete_and_current_process_entries() {
        let h = harness(false, None);
        let envelope = session(Vec::new(), vec![session_span(None)]);
        let finished = cache(&h, &envelope, "previous", true);
        let live = cache(&h, &envelope, "current", false);

        let report = h.service.resurrect_old_payloads();

        assert_eq!(report, ResurrectionReport::default());
        assert!(h.store.load(&finished).is_some());
        assert!(h.store.load(&live).is_some());
        assert!(h.intake.taken.lock().is_empty());
    }

    #[test]
    fn test_invalid_sessions_are_left_cached() {
        let h = harness(false, None);
        let no_root = cache(&h, &session(vec![span("a", 1, Some(2))], Vec::new()), "previous", false);
        let valid = cache(&h, &session(Vec::new(), vec![session_span(None)]), "previous", false);

        let report = h.service.resurrect_old_payloads();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.resurrected, 1);
        assert!(h.store.load(&no_root).is_some());
        assert!(h.store.load(&valid).is_none());
        assert_eq!(h.errors.count(InternalErrorKind::ResurrectionFailure), 1);
    }

    #[test]
    fn test_malformed_entry_does_not_block_others() {
        let h = harness(false, None);
        let broken = StoredTelemetryMetadata::new(
            EnvelopeKind::Session,
            &ProcessIdentifier::from("previous"),
            false,
        );
        h.store
            .store(&broken, &mut |w| w.write_all(b"{\"data\": nope"))
            .unwrap();
        let valid = cache(&h, &session(Vec::new(), vec![session_span(None)]), "previous", false);

        let report = h.service.resurrect_old_payloads();

        assert_eq!(report.failed, 1);
        assert_eq!(report.resurrected, 1);
        assert!(h.store.load(&broken).is_some());
        assert!(h.store.load(&valid).is_none());
        assert_eq!(h.errors.len(), 1);
    }

    #[test]
    fn test_rejected_hand_off_keeps_original() {
        let h = harness(true, None);
        let original = cache(&h, &session(Vec::new(), vec![session_span(None)]), "previous", false);

        let report = h.service.resurrect_old_payloads();

        assert_eq!(report.failed, 1);
        assert!(h.store.load(&original).is_some());
        assert_eq!(h.errors.count(InternalErrorKind::ResurrectionFailure), 1);
    }
}
