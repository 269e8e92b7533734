//! # Delivery Pipeline
//!
//! Builds every delivery component explicitly and starts them in order:
//!
//! 1. payload store (stale temporary files purged)
//! 2. transport (HTTP unless one is injected)
//! 3. scheduler, which listens for stored payloads
//! 4. intake worker
//! 5. resurrection of sessions left behind by earlier processes
//! 6. scheduling, with a first pass over everything already cached
//!
//! Nothing is sent before resurrection has finished.

mod error;

pub use error::{PipelineError, PipelineResult};

use delivery_core::{
    init_logging, ConnectivityFeed, DeliveryConfig, EnvelopeKind, ErrorHandlerHandle,
    LoggingErrorHandler, NativeCrashSource, Paths, ProcessIdentifier, StoredTelemetryMetadata,
    TelemetryEnvelope,
};
use delivery_scheduler::{SchedulerConfig, SchedulingService};
use intake_queue::{IntakeResult, IntakeService, TelemetryIntake};
use payload_resurrection::{PayloadResurrectionService, ResurrectionReport};
use payload_store::{FsPayloadStore, PayloadStore};
use request_execution::{ExecutionConfig, HttpRequestExecutionService, RequestExecutionService};
use std::sync::Arc;
use tracing::{info, warn};

/// Collaborators supplied by the host.
pub struct PipelineDeps {
    pub connectivity: ConnectivityFeed,
    /// Replaces the HTTP transport.
    pub transport: Option<Arc<dyn RequestExecutionService>>,
    pub crash_source: Option<Arc<dyn NativeCrashSource>>,
    /// Defaults to [`LoggingErrorHandler`].
    pub error_handler: Option<ErrorHandlerHandle>,
}

impl PipelineDeps {
    pub fn new(connectivity: ConnectivityFeed) -> Self {
        Self {
            connectivity,
            transport: None,
            crash_source: None,
            error_handler: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn RequestExecutionService>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_crash_source(mut self, crash_source: Arc<dyn NativeCrashSource>) -> Self {
        self.crash_source = Some(crash_source);
        self
    }

    pub fn with_error_handler(mut self, errors: ErrorHandlerHandle) -> Self {
        self.error_handler = Some(errors);
        self
    }
}

/// A running delivery pipeline.
pub struct DeliveryPipeline {
    process_id: ProcessIdentifier,
    store: Arc<FsPayloadStore>,
    intake: Arc<IntakeService>,
    scheduler: SchedulingService,
    resurrection: ResurrectionReport,
}

impl DeliveryPipeline {
    /// Build and start the pipeline. Must be called within a tokio runtime.
    pub async fn start(
        config: DeliveryConfig,
        paths: Paths,
        deps: PipelineDeps,
    ) -> PipelineResult<Self> {
        config.validate()?;
        paths.ensure_dirs()?;
        init_logging(&config.log_level, Some(&paths));

        let process_id = ProcessIdentifier::generate();
        info!(process_id = %process_id, app_id = %config.app_id, "Starting delivery pipeline");

        let errors = deps
            .error_handler
            .unwrap_or_else(|| Arc::new(LoggingErrorHandler));

        // Payload store
        let store = Arc::new(FsPayloadStore::new(paths.payload_dir())?);
        match store.purge_temporary_files() {
            Ok(0) => {}
            Ok(purged) => info!(purged, "Removed interrupted payload writes"),
            Err(e) => warn!(error = %e, "Failed to purge temporary payload files"),
        }
        info!(path = %store.dir().display(), "Payload store opened");

        // Transport
        let transport: Arc<dyn RequestExecutionService> = match deps.transport {
            Some(transport) => transport,
            None => {
                let execution = ExecutionConfig::from_delivery_config(&config)?;
                info!(base_url = %execution.base_url, "HTTP transport initialized");
                Arc::new(HttpRequestExecutionService::new(execution)?)
            }
        };

        // Scheduler first so intake can notify it
        let scheduler = SchedulingService::new(
            SchedulerConfig::from_delivery_config(&config),
            store.clone(),
            transport,
            deps.connectivity,
            errors.clone(),
        );

        let intake = Arc::new(IntakeService::new(
            store.clone(),
            Arc::new(scheduler.clone()),
            errors.clone(),
            config.shutdown_timeout(),
        ));
        intake.start();

        // Resurrection touches the disk, keep it off the runtime threads
        let resurrection_service = PayloadResurrectionService::new(
            intake.clone(),
            store.clone(),
            deps.crash_source,
            process_id.clone(),
            errors,
        );
        let resurrection =
            tokio::task::spawn_blocking(move || resurrection_service.resurrect_old_payloads())
                .await?;

        scheduler.start();
        info!(
            resurrected = resurrection.resurrected,
            "Delivery pipeline started"
        );

        Ok(Self {
            process_id,
            store,
            intake,
            scheduler,
            resurrection,
        })
    }

    /// Hand a finished envelope over for storage and delivery.
    pub fn take(
        &self,
        envelope: TelemetryEnvelope,
        metadata: StoredTelemetryMetadata,
    ) -> IntakeResult<()> {
        self.intake.take(envelope, metadata)
    }

    /// Metadata for a new payload owned by this process.
    pub fn new_metadata(&self, kind: EnvelopeKind, complete: bool) -> StoredTelemetryMetadata {
        StoredTelemetryMetadata::new(kind, &self.process_id, complete)
    }

    pub fn process_id(&self) -> &ProcessIdentifier {
        &self.process_id
    }

    /// What resurrection did at startup.
    pub fn resurrection_report(&self) -> ResurrectionReport {
        self.resurrection
    }

    pub fn scheduler(&self) -> &SchedulingService {
        &self.scheduler
    }

    pub fn intake(&self) -> &IntakeService {
        &self.intake
    }

    pub fn store(&self) -> &dyn PayloadStore {
        self.store.as_ref()
    }

    /// Stop intake within the configured timeout, then drop pending retries.
    /// Returns `false` when queued payloads had to be abandoned.
    pub async fn shutdown(&self) -> bool {
        let drained = self.intake.shutdown().await;
        self.scheduler.shutdown();
        info!(drained, "Delivery pipeline stopped");
        drained
    }
}
