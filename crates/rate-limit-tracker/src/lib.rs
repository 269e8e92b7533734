//! Per-endpoint rate limit tracking.
//!
//! Each endpoint moves between two states:
//!
//! ```text
//!   OK ──(rate-limit response)──▶ RATE_LIMITED ──(window elapsed | success)──▶ OK
//! ```
//!
//! While limited, nothing is sent to the endpoint. The window comes from
//! the server's `Retry-After` when present, otherwise from exponential
//! backoff over the number of consecutive rate-limited responses:
//! `base * growth^(n-1)`. Once that exceeds the policy maximum, the endpoint
//! stays limited for the maximum window and no automatic retry is
//! scheduled; the next successful request resets the sequence.
//!
//! Every endpoint has its own lock, so read-modify-write of the consecutive
//! counter never loses updates while other endpoints proceed in parallel.

use delivery_core::{Endpoint, RateLimitPolicy};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Rate limit state of one endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointRateLimitState {
    /// When the current window lifts; `None` when not limited.
    pub limited_until: Option<Instant>,
    /// Rate-limited responses since the last success.
    pub consecutive_limits: u32,
}

impl EndpointRateLimitState {
    pub fn is_limited_at(&self, now: Instant) -> bool {
        self.limited_until.is_some_and(|until| now < until)
    }
}

/// Rate limit bookkeeping for every endpoint.
#[derive(Debug)]
pub struct RateLimitTracker {
    policy: RateLimitPolicy,
    states: [Mutex<EndpointRateLimitState>; 4],
}

impl RateLimitTracker {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            states: Default::default(),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    fn slot(&self, endpoint: Endpoint) -> &Mutex<EndpointRateLimitState> {
        &self.states[endpoint.index()]
    }

    /// Record a rate-limited response and open a new window.
    ///
    /// Returns when an automatic retry should run, or `None` when the
    /// backoff has exceeded the policy maximum.
    pub fn on_rate_limited(
        &self,
        endpoint: Endpoint,
        retry_after: Option<Duration>,
    ) -> Option<Duration> {
        let mut state = self.slot(endpoint).lock();
        state.consecutive_limits = state.consecutive_limits.saturating_add(1);

        let retry_in = match retry_after {
            Some(after) => Some(after.min(self.policy.max_delay)),
            None => compute_rate_limit_delay(state.consecutive_limits, &self.policy),
        };
        let window = retry_in.unwrap_or(self.policy.max_delay);
        state.limited_until = Some(Instant::now() + window);

        match retry_in {
            Some(delay) => info!(
                endpoint = %endpoint,
                consecutive = state.consecutive_limits,
                delay_secs = delay.as_secs_f64(),
                "Endpoint rate limited"
            ),
            None => info!(
                endpoint = %endpoint,
                consecutive = state.consecutive_limits,
                "Endpoint rate limited beyond maximum backoff, no automatic retry"
            ),
        }
        retry_in
    }

    /// Reset an endpoint after a successful request.
    pub fn clear(&self, endpoint: Endpoint) {
        let mut state = self.slot(endpoint).lock();
        if state.consecutive_limits > 0 || state.limited_until.is_some() {
            debug!(endpoint = %endpoint, "Rate limit cleared");
        }
        *state = EndpointRateLimitState::default();
    }

    /// Whether sends to `endpoint` must wait. An elapsed window lifts here.
    pub fn is_rate_limited(&self, endpoint: Endpoint) -> bool {
        let mut state = self.slot(endpoint).lock();
        let now = Instant::now();
        if state.is_limited_at(now) {
            return true;
        }
        if state.limited_until.take().is_some() {
            debug!(endpoint = %endpoint, "Rate limit window elapsed");
        }
        false
    }

    /// Time left in the current window.
    pub fn remaining(&self, endpoint: Endpoint) -> Option<Duration> {
        let state = self.slot(endpoint).lock();
        let now = Instant::now();
        state
            .limited_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    pub fn state(&self, endpoint: Endpoint) -> EndpointRateLimitState {
        *self.slot(endpoint).lock()
    }
}

/// Backoff for the `consecutive`-th rate-limited response without
/// `Retry-After`, or `None` once it exceeds the policy maximum.
pub fn compute_rate_limit_delay(consecutive: u32, policy: &RateLimitPolicy) -> Option<Duration> {
    if consecutive == 0 {
        return Some(Duration::ZERO);
    }
    let base_ms = policy.base_delay.as_millis() as u64;
    let max_ms = policy.max_delay.as_millis() as u64;
    let multiplier = u64::from(policy.growth_factor.max(1))
        .checked_pow(consecutive - 1)
        .unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(multiplier);
    (delay_ms <= max_ms).then(|| Duration::from_millis(delay_ms))
}
