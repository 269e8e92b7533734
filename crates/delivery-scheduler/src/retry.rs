//! The process-wide retry task for pending calls.

use delivery_core::RetryPolicy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Delay before the next retry pass, or `None` to stop retrying.
///
/// After a pass where nothing failed the base delay is used again;
/// otherwise the previous delay doubles (never below the base). Once the
/// result would exceed the maximum, no further pass is scheduled.
pub fn next_retry_delay(previous: Duration, any_failed: bool, policy: &RetryPolicy) -> Option<Duration> {
    let next = if any_failed {
        previous.saturating_mul(2).max(policy.base_delay)
    } else {
        policy.base_delay
    };
    (next <= policy.max_delay).then_some(next)
}

/// Handle on a scheduled retry pass.
pub(crate) struct RetryTask {
    pub(crate) generation: u64,
    pub(crate) delay: Duration,
    started: Arc<AtomicBool>,
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl RetryTask {
    pub(crate) fn new(
        generation: u64,
        delay: Duration,
        started: Arc<AtomicBool>,
        cancel: oneshot::Sender<()>,
        handle: JoinHandle<()>,
    ) -> Self {
        Self {
            generation,
            delay,
            started,
            cancel: Some(cancel),
            handle,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    pub(crate) fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Stop the task if its pass has not begun. Returns whether it was stopped.
    pub(crate) fn cancel(&mut self) -> bool {
        if self.has_started() {
            return false;
        }
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        true
    }

    pub(crate) fn abort(&self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_delay_doubles_on_failure_until_cap() {
        let policy = RetryPolicy::default();
        let mut delays = Vec::new();
        let mut current = policy.base_delay;
        while let Some(next) = next_retry_delay(current, true, &policy) {
            delays.push(next.as_secs());
            current = next;
        }

        assert_eq!(delays, vec![240, 480, 960, 1920]);
        assert_eq!(next_retry_delay(secs(1920), true, &policy), None);
    }

    #[test]
    fn test_delay_resets_without_failures() {
        let policy = RetryPolicy::default();
        assert_eq!(next_retry_delay(secs(1920), false, &policy), Some(secs(120)));
    }

    #[test]
    fn test_immediate_trigger_falls_back_to_base() {
        let policy = RetryPolicy::default();
        assert_eq!(next_retry_delay(Duration::ZERO, true, &policy), Some(secs(120)));
        assert_eq!(next_retry_delay(secs(30), true, &policy), Some(secs(120)));
    }
}
