//! Delivery passes, retries and connectivity handling.

use crate::pending::{PendingApiCall, PendingApiCalls};
use crate::retry::{next_retry_delay, RetryTask};
use delivery_core::{
    ConnectivityFeed, DeliveryConfig, Endpoint, ErrorHandlerHandle, InternalErrorKind,
    NetworkStatus, PayloadIntakeListener, RateLimitPolicy, RetryPolicy, StoredTelemetryMetadata,
};
use parking_lot::Mutex;
use payload_store::PayloadStore;
use rate_limit_tracker::RateLimitTracker;
use request_execution::{ExecutionOutcome, RequestExecutionService};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tunables for [`SchedulingService`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitPolicy,
    pub max_pending_api_calls: usize,
    pub max_call_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            rate_limit: RateLimitPolicy::default(),
            max_pending_api_calls: 200,
            max_call_attempts: 20,
        }
    }
}

impl SchedulerConfig {
    pub fn from_delivery_config(config: &DeliveryConfig) -> Self {
        Self {
            retry: config.retry_policy(),
            rate_limit: config.rate_limit_policy(),
            max_pending_api_calls: config.max_pending_api_calls,
            max_call_attempts: config.max_call_attempts,
        }
    }
}

/// What a single pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Sent and removed from the store.
    pub delivered: usize,
    /// Failed and waiting in the pending queue for the retry task.
    pub requeued: usize,
    /// Rate limited and waiting in the pending queue for the endpoint's window.
    pub rate_limited: usize,
    /// Rejected by the server and removed from the store.
    pub discarded: usize,
    /// Not retried again by this process.
    pub abandoned: usize,
    /// Left alone because the endpoint was rate limited or the network dropped.
    pub deferred: usize,
    /// The pass did nothing because the network was unreachable.
    pub skipped_offline: bool,
}

impl PassSummary {
    fn record(&mut self, result: CallResult) {
        match result {
            CallResult::Delivered => self.delivered += 1,
            CallResult::Requeued => self.requeued += 1,
            CallResult::RateLimited => self.rate_limited += 1,
            CallResult::Discarded => self.discarded += 1,
            CallResult::Abandoned => self.abandoned += 1,
        }
    }
}

enum CallResult {
    Delivered,
    Requeued,
    RateLimited,
    Discarded,
    Abandoned,
}

struct RateLimitTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Sends stored payloads and retries the ones that failed.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct SchedulingService {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    store: Arc<dyn PayloadStore>,
    executor: Arc<dyn RequestExecutionService>,
    network: ConnectivityFeed,
    errors: ErrorHandlerHandle,
    rate_limits: RateLimitTracker,
    pending: Mutex<PendingApiCalls>,
    /// Payloads this process gave up on. They stay on disk for the next launch.
    abandoned: Mutex<HashSet<StoredTelemetryMetadata>>,
    retry_slot: Mutex<Option<RetryTask>>,
    retry_generation: AtomicU64,
    rate_limit_timers: Mutex<[Option<RateLimitTimer>; 4]>,
    timer_generation: AtomicU64,
    /// Endpoints whose backoff passed the cap. Their pending calls wait for
    /// a connectivity change.
    parked: Mutex<[bool; 4]>,
    /// Serializes delivery and retry passes.
    pass_lock: tokio::sync::Mutex<()>,
    delivery_signal: Notify,
    background: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    shut_down: AtomicBool,
}

impl SchedulingService {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn PayloadStore>,
        executor: Arc<dyn RequestExecutionService>,
        network: ConnectivityFeed,
        errors: ErrorHandlerHandle,
    ) -> Self {
        let pending = PendingApiCalls::new(config.max_pending_api_calls);
        let rate_limits = RateLimitTracker::new(config.rate_limit);
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                store,
                executor,
                network,
                errors,
                rate_limits,
                pending: Mutex::new(pending),
                abandoned: Mutex::new(HashSet::new()),
                retry_slot: Mutex::new(None),
                retry_generation: AtomicU64::new(0),
                rate_limit_timers: Mutex::new(Default::default()),
                timer_generation: AtomicU64::new(0),
                parked: Mutex::new([false; 4]),
                pass_lock: tokio::sync::Mutex::new(()),
                delivery_signal: Notify::new(),
                background: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the delivery loop and the connectivity listener, then run a
    /// first pass over whatever is already stored.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!("Scheduling service already started");
            return;
        }
        let delivery = tokio::spawn(Arc::clone(&self.inner).delivery_loop());
        let connectivity = tokio::spawn(Arc::clone(&self.inner).connectivity_loop());
        self.inner.background.lock().extend([delivery, connectivity]);
        self.inner.delivery_signal.notify_one();
        info!(
            max_pending = self.inner.config.max_pending_api_calls,
            network = %self.network_status(),
            "Scheduling service started"
        );
    }

    /// Walk the store once and send every complete payload that is not
    /// already pending or rate limited.
    pub async fn run_delivery_pass(&self) -> PassSummary {
        self.inner.run_delivery_pass().await
    }

    /// Resend pending calls now, across all endpoints.
    pub async fn run_retry_pass(&self) -> PassSummary {
        self.inner.run_retry_pass(None).await
    }

    /// Cancel the scheduled retry pass if it has not begun.
    pub fn cancel_retry_task(&self) -> bool {
        self.inner.cancel_retry_task()
    }

    pub fn pending_calls(&self) -> Vec<PendingApiCall> {
        self.inner.pending.lock().snapshot()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Whether a retry pass is scheduled or running.
    pub fn is_retry_task_active(&self) -> bool {
        self.inner
            .retry_slot
            .lock()
            .as_ref()
            .is_some_and(RetryTask::is_active)
    }

    /// Delay of the currently scheduled retry pass.
    pub fn scheduled_retry_delay(&self) -> Option<Duration> {
        self.inner
            .retry_slot
            .lock()
            .as_ref()
            .filter(|task| task.is_active())
            .map(|task| task.delay)
    }

    pub fn network_status(&self) -> NetworkStatus {
        *self.inner.network.borrow()
    }

    pub fn rate_limits(&self) -> &RateLimitTracker {
        &self.inner.rate_limits
    }

    /// Whether `endpoint` went past the rate-limit cap and gets no automatic
    /// retry until connectivity changes.
    pub fn is_parked(&self, endpoint: Endpoint) -> bool {
        self.inner.is_parked(endpoint)
    }

    /// Whether this process gave up on `metadata`.
    pub fn is_abandoned(&self, metadata: &StoredTelemetryMetadata) -> bool {
        self.inner.abandoned.lock().contains(metadata)
    }

    /// Stop every background task. Pending calls are dropped; their payloads
    /// stay stored for the next launch.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.inner.retry_slot.lock().take() {
            task.abort();
        }
        for timer in self.inner.rate_limit_timers.lock().iter_mut() {
            if let Some(timer) = timer.take() {
                timer.handle.abort();
            }
        }
        for handle in self.inner.background.lock().drain(..) {
            handle.abort();
        }
        info!(pending = self.pending_count(), "Scheduling service stopped");
    }
}

impl PayloadIntakeListener for SchedulingService {
    fn on_payload_intake(&self) {
        self.inner.delivery_signal.notify_one();
    }
}

impl SchedulerInner {
    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn is_online(&self) -> bool {
        self.network.borrow().is_reachable()
    }

    async fn delivery_loop(self: Arc<Self>) {
        loop {
            self.delivery_signal.notified().await;
            if self.is_shut_down() {
                break;
            }
            self.run_delivery_pass().await;
        }
    }

    async fn connectivity_loop(self: Arc<Self>) {
        let mut feed = self.network.clone();
        feed.borrow_and_update();
        while feed.changed().await.is_ok() {
            let status = *feed.borrow_and_update();
            if self.is_shut_down() {
                break;
            }
            self.on_network_status_changed(status);
        }
        debug!("Connectivity feed closed");
    }

    fn on_network_status_changed(self: &Arc<Self>, status: NetworkStatus) {
        info!(network = %status, "Network status changed");
        if status.is_reachable() {
            self.unpark_all();
            self.schedule_retry(Duration::ZERO);
            self.delivery_signal.notify_one();
        } else if self.cancel_retry_task() {
            debug!("Cancelled retry task while offline");
        }
    }

    async fn run_delivery_pass(self: &Arc<Self>) -> PassSummary {
        let mut summary = PassSummary::default();
        let guard = self.pass_lock.lock().await;
        if !self.is_online() {
            debug!("Skipping delivery pass, network not reachable");
            summary.skipped_offline = true;
            return summary;
        }

        for metadata in self.store.list_all() {
            if !metadata.complete || self.is_tracked(&metadata) {
                continue;
            }
            if self.rate_limits.is_rate_limited(metadata.endpoint()) {
                summary.deferred += 1;
                continue;
            }
            if self.is_shut_down() || !self.is_online() {
                summary.skipped_offline = true;
                break;
            }
            let result = self.deliver(PendingApiCall::new(metadata)).await;
            summary.record(result);
        }
        drop(guard);

        if summary.requeued > 0 {
            self.schedule_retry(self.config.retry.base_delay);
        }
        debug!(
            delivered = summary.delivered,
            requeued = summary.requeued,
            rate_limited = summary.rate_limited,
            discarded = summary.discarded,
            abandoned = summary.abandoned,
            deferred = summary.deferred,
            "Delivery pass finished"
        );
        summary
    }

    fn is_parked(&self, endpoint: Endpoint) -> bool {
        self.parked.lock()[endpoint.index()]
    }

    fn set_parked(&self, endpoint: Endpoint, parked: bool) {
        self.parked.lock()[endpoint.index()] = parked;
    }

    /// Release every parked endpoint. One still inside its window gets a
    /// rate-limit retry for the time left.
    fn unpark_all(self: &Arc<Self>) {
        let parked = std::mem::take(&mut *self.parked.lock());
        for endpoint in Endpoint::ALL {
            if !parked[endpoint.index()] {
                continue;
            }
            info!(endpoint = %endpoint, "Releasing rate-limited endpoint after connectivity change");
            if let Some(remaining) = self.rate_limits.remaining(endpoint) {
                self.schedule_rate_limit_retry(endpoint, remaining);
            }
        }
    }

    /// Calls the retry task may send: their endpoint is neither inside a
    /// rate-limit window nor parked.
    fn is_retry_task_call(&self, call: &PendingApiCall) -> bool {
        !self.is_parked(call.endpoint) && !self.rate_limits.is_rate_limited(call.endpoint)
    }

    /// Pending or already given up on.
    fn is_tracked(&self, metadata: &StoredTelemetryMetadata) -> bool {
        let pending = self.pending.lock().contains(metadata);
        pending || self.abandoned.lock().contains(metadata)
    }

    async fn run_retry_pass(self: &Arc<Self>, only: Option<Endpoint>) -> PassSummary {
        let mut summary = PassSummary::default();
        let _guard = self.pass_lock.lock().await;
        if !self.is_online() {
            summary.skipped_offline = true;
            return summary;
        }

        let due = self.pending.lock().take_matching(|call| match only {
            Some(endpoint) => endpoint == call.endpoint,
            None => self.is_retry_task_call(call),
        });
        for call in due {
            if self.is_shut_down() || !self.is_online() || self.rate_limits.is_rate_limited(call.endpoint) {
                summary.deferred += 1;
                self.restore(call);
                continue;
            }
            let result = self.deliver(call).await;
            summary.record(result);
        }
        summary
    }

    async fn deliver(self: &Arc<Self>, call: PendingApiCall) -> CallResult {
        let Some(payload) = self.store.load(&call.metadata) else {
            warn!(payload = %call.metadata, "Stored payload missing or unreadable, skipping");
            self.abandoned.lock().insert(call.metadata);
            return CallResult::Abandoned;
        };
        let outcome = self.executor.execute(call.endpoint, payload).await;
        self.handle_outcome(call, outcome)
    }

    fn handle_outcome(self: &Arc<Self>, call: PendingApiCall, outcome: ExecutionOutcome) -> CallResult {
        match outcome {
            ExecutionOutcome::Success => {
                info!(
                    payload = %call.metadata,
                    endpoint = %call.endpoint,
                    attempts = call.attempts + 1,
                    "Payload delivered"
                );
                self.rate_limits.clear(call.endpoint);
                self.set_parked(call.endpoint, false);
                self.remove_payload(call.metadata);
                CallResult::Delivered
            }
            ExecutionOutcome::RateLimited { retry_after } => {
                let endpoint = call.endpoint;
                match self.rate_limits.on_rate_limited(endpoint, retry_after) {
                    Some(delay) => self.schedule_rate_limit_retry(endpoint, delay),
                    None => {
                        warn!(
                            endpoint = %endpoint,
                            "Rate-limit backoff exceeded its cap, waiting for a connectivity change"
                        );
                        self.set_parked(endpoint, true);
                    }
                }
                match self.requeue(call.next_attempt()) {
                    CallResult::Requeued => CallResult::RateLimited,
                    other => other,
                }
            }
            ExecutionOutcome::TransientFailure { reason } => {
                warn!(
                    payload = %call.metadata,
                    endpoint = %call.endpoint,
                    reason = %reason,
                    "Request failed, will retry"
                );
                self.requeue(call.next_attempt())
            }
            ExecutionOutcome::PermanentFailure { reason } => {
                self.errors.track(
                    InternalErrorKind::DeliveryFailure,
                    format!("{} rejected by {}: {}", call.metadata, call.endpoint, reason),
                );
                self.remove_payload(call.metadata);
                CallResult::Discarded
            }
        }
    }

    /// Delete a finished payload. If that fails the payload is never sent
    /// again by this process.
    fn remove_payload(&self, metadata: StoredTelemetryMetadata) {
        if let Err(err) = self.store.delete(&metadata) {
            self.errors.track(
                InternalErrorKind::StorageFailure,
                format!("failed to delete {}: {}", metadata, err),
            );
            self.abandoned.lock().insert(metadata);
        }
    }

    fn requeue(&self, call: PendingApiCall) -> CallResult {
        if call.attempts >= self.config.max_call_attempts {
            warn!(
                payload = %call.metadata,
                attempts = call.attempts,
                "Giving up on call after too many attempts"
            );
            self.abandoned.lock().insert(call.metadata);
            return CallResult::Abandoned;
        }
        let pushed = self.pending.lock().push(call);
        match pushed {
            Ok(()) => CallResult::Requeued,
            Err(call) => {
                warn!(
                    payload = %call.metadata,
                    capacity = self.config.max_pending_api_calls,
                    "Pending call queue full, dropping call"
                );
                self.abandoned.lock().insert(call.metadata);
                CallResult::Abandoned
            }
        }
    }

    /// Put back a call that was taken for retry but not attempted.
    fn restore(&self, call: PendingApiCall) {
        let pushed = self.pending.lock().push(call);
        if let Err(call) = pushed {
            self.abandoned.lock().insert(call.metadata);
        }
    }

    fn schedule_retry(self: &Arc<Self>, delay: Duration) {
        if self.is_shut_down() {
            return;
        }
        let mut slot = self.retry_slot.lock();
        if slot.as_ref().is_some_and(RetryTask::is_active) {
            debug!("Retry task already scheduled");
            return;
        }
        let pending = self.retry_task_call_count();
        if pending == 0 {
            return;
        }

        let generation = self.retry_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Arc::new(AtomicBool::new(false));
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let inner = Arc::clone(self);
        let task_started = Arc::clone(&started);
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel_rx => return,
            }
            task_started.store(true, Ordering::SeqCst);
            inner.run_scheduled_retry(generation, delay).await;
        });
        *slot = Some(RetryTask::new(generation, delay, started, cancel_tx, handle));
        info!(
            delay_secs = delay.as_secs(),
            pending,
            "Scheduled retry of failed API calls"
        );
    }

    async fn run_scheduled_retry(self: &Arc<Self>, generation: u64, delay: Duration) {
        if self.is_shut_down() {
            return;
        }
        if !self.is_online() {
            info!("Did not retry failed API calls, network not reachable");
            self.clear_retry_slot(generation);
            return;
        }

        let summary = self.run_retry_pass(None).await;
        self.clear_retry_slot(generation);
        info!(
            delivered = summary.delivered,
            requeued = summary.requeued,
            "Retried failed API calls"
        );

        if self.retry_task_call_count() == 0 {
            return;
        }
        match next_retry_delay(delay, summary.requeued > 0, &self.config.retry) {
            Some(next) => self.schedule_retry(next),
            None => info!("Stopped scheduling retries until connectivity changes or the next launch"),
        }
    }

    fn retry_task_call_count(&self) -> usize {
        self.pending
            .lock()
            .count_matching(|call| self.is_retry_task_call(call))
    }

    fn clear_retry_slot(&self, generation: u64) {
        let mut slot = self.retry_slot.lock();
        if slot.as_ref().is_some_and(|task| task.generation == generation) {
            slot.take();
        }
    }

    fn cancel_retry_task(&self) -> bool {
        let mut slot = self.retry_slot.lock();
        let Some(task) = slot.as_mut() else {
            return false;
        };
        if !task.is_active() {
            slot.take();
            return false;
        }
        if !task.cancel() {
            debug!("Retry pass already running, not cancelled");
            return false;
        }
        slot.take();
        true
    }

    fn schedule_rate_limit_retry(self: &Arc<Self>, endpoint: Endpoint, delay: Duration) {
        if self.is_shut_down() {
            return;
        }
        let generation = self.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if inner.is_shut_down() || !inner.is_current_timer(endpoint, generation) {
                return;
            }
            debug!(endpoint = %endpoint, "Rate limit window elapsed, retrying endpoint");
            let summary = inner.run_retry_pass(Some(endpoint)).await;
            if summary.requeued > 0 {
                inner.schedule_retry(inner.config.retry.base_delay);
            }
            inner.delivery_signal.notify_one();
        });
        self.rate_limit_timers.lock()[endpoint.index()] = Some(RateLimitTimer { generation, handle });
    }

    fn is_current_timer(&self, endpoint: Endpoint, generation: u64) -> bool {
        self.rate_limit_timers.lock()[endpoint.index()]
            .as_ref()
            .is_some_and(|timer| timer.generation == generation)
    }
}
