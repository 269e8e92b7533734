//! # Intake Queue
//!
//! Accepts finished envelopes from telemetry producers and persists them
//! off the caller's thread.
//!
//! ```text
//! producer ──take()──▶ priority heap ──▶ worker task ──spawn_blocking──▶ PayloadStore
//!                                              │
//!                                              └──▶ PayloadIntakeListener (scheduler)
//! ```
//!
//! - `take` only pushes onto an in-memory heap and returns.
//! - A single worker pops jobs in metadata order (priority, then time) and
//!   FIFO among equal keys, so at most one write is in flight at a time.
//! - Serialization and the file write run on the blocking pool. An error or
//!   a panic inside one job is reported through the internal error channel
//!   and the worker carries on with the next job.
//! - `shutdown` stops accepting work, lets the worker drain for at most the
//!   configured timeout and then aborts it. Anything still queued is lost,
//!   which is the same outcome as a crash.

mod error;

pub use error::{IntakeError, IntakeResult};

use delivery_core::{
    ErrorHandlerHandle, InternalErrorKind, PayloadIntakeListener, StoredTelemetryMetadata,
    TelemetryEnvelope,
};
use parking_lot::Mutex;
use payload_store::PayloadStore;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Entry point for producers handing over finished telemetry.
pub trait TelemetryIntake: Send + Sync {
    /// Queue `envelope` for storage under `metadata`. Returns immediately.
    fn take(&self, envelope: TelemetryEnvelope, metadata: StoredTelemetryMetadata)
        -> IntakeResult<()>;
}

struct QueuedIntake {
    metadata: StoredTelemetryMetadata,
    envelope: TelemetryEnvelope,
    sequence: u64,
}

impl QueuedIntake {
    fn key(&self) -> (u8, i64, u64) {
        (self.metadata.priority, self.metadata.timestamp_ms, self.sequence)
    }
}

impl PartialEq for QueuedIntake {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedIntake {}

impl PartialOrd for QueuedIntake {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedIntake {
    // BinaryHeap pops the greatest element; the smallest key goes first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

struct IntakeInner {
    queue: Mutex<BinaryHeap<QueuedIntake>>,
    wakeup: Notify,
    accepting: AtomicBool,
    closing: AtomicBool,
    sequence: AtomicU64,
    store: Arc<dyn PayloadStore>,
    listener: Arc<dyn PayloadIntakeListener>,
    errors: ErrorHandlerHandle,
}

impl IntakeInner {
    fn pop(&self) -> Option<QueuedIntake> {
        self.queue.lock().pop()
    }

    async fn run(self: Arc<Self>) {
        debug!("Intake worker started");
        loop {
            match self.pop() {
                Some(job) => self.process(job).await,
                None if self.closing.load(AtomicOrdering::SeqCst) => break,
                None => self.wakeup.notified().await,
            }
        }
        debug!("Intake worker drained");
    }

    async fn process(&self, job: QueuedIntake) {
        let store = Arc::clone(&self.store);
        let metadata = job.metadata;
        let envelope = job.envelope;
        let name = metadata.filename();

        let result = tokio::task::spawn_blocking(move || {
            store.store(&metadata, &mut |writer| {
                serde_json::to_writer(writer, &envelope).map_err(io::Error::from)
            })
        })
        .await;

        match result {
            Ok(Ok(())) => {
                debug!(payload = %name, "Payload stored");
                self.listener.on_payload_intake();
            }
            Ok(Err(err)) => {
                self.errors.track(
                    InternalErrorKind::IntakeFailure,
                    format!("failed to store {name}: {err}"),
                );
            }
            Err(join_err) => {
                self.errors.track(
                    InternalErrorKind::IntakeFailure,
                    format!("storing {name} aborted: {join_err}"),
                );
            }
        }
    }
}

/// Single-consumer intake worker.
///
/// Create with [`IntakeService::new`], call [`start`](Self::start) from
/// within a tokio runtime, submit with [`TelemetryIntake::take`].
pub struct IntakeService {
    inner: Arc<IntakeInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl IntakeService {
    pub fn new(
        store: Arc<dyn PayloadStore>,
        listener: Arc<dyn PayloadIntakeListener>,
        errors: ErrorHandlerHandle,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(IntakeInner {
                queue: Mutex::new(BinaryHeap::new()),
                wakeup: Notify::new(),
                accepting: AtomicBool::new(true),
                closing: AtomicBool::new(false),
                sequence: AtomicU64::new(0),
                store,
                listener,
                errors,
            }),
            worker: Mutex::new(None),
            shutdown_timeout,
        }
    }

    /// Spawn the worker task. Calling it again is a no-op.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!("Intake worker already started");
            return;
        }
        *worker = Some(tokio::spawn(Arc::clone(&self.inner).run()));
    }

    /// Jobs waiting for the worker.
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(AtomicOrdering::SeqCst)
    }

    /// Stop accepting work and wait up to the shutdown timeout for queued
    /// jobs to be written. Returns `true` when everything was drained.
    pub async fn shutdown(&self) -> bool {
        self.inner.accepting.store(false, AtomicOrdering::SeqCst);
        self.inner.closing.store(true, AtomicOrdering::SeqCst);
        self.inner.wakeup.notify_one();

        let handle = self.worker.lock().take();
        let Some(mut handle) = handle else {
            return self.queued() == 0;
        };

        match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
            Ok(_) => {
                info!("Intake shut down cleanly");
                true
            }
            Err(_) => {
                handle.abort();
                warn!(
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    dropped = self.queued(),
                    "Intake did not drain before timeout, stopping worker"
                );
                false
            }
        }
    }
}

impl TelemetryIntake for IntakeService {
    fn take(
        &self,
        envelope: TelemetryEnvelope,
        metadata: StoredTelemetryMetadata,
    ) -> IntakeResult<()> {
        if !self.is_accepting() {
            warn!(payload = %metadata, "Rejected payload submitted after intake shutdown");
            return Err(IntakeError::ShutDown);
        }
        if envelope.kind() != metadata.kind {
            return Err(IntakeError::KindMismatch {
                metadata: metadata.kind,
                envelope: envelope.kind(),
            });
        }
        if let Err(err) = metadata.validate() {
            return Err(IntakeError::InvalidMetadata(err.to_string()));
        }

        let sequence = self.inner.sequence.fetch_add(1, AtomicOrdering::SeqCst);
        self.inner.queue.lock().push(QueuedIntake {
            metadata,
            envelope,
            sequence,
        });
        self.inner.wakeup.notify_one();
        Ok(())
    }
}
