use std::fmt;
use std::time::Duration;

/// Result of one transmission attempt, acted on by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success,
    /// The endpoint asked us to back off, optionally for a given duration.
    RateLimited { retry_after: Option<Duration> },
    /// Worth retrying later (network error, timeout, server error).
    TransientFailure { reason: String },
    /// The collector will never accept this payload.
    PermanentFailure { reason: String },
}

impl ExecutionOutcome {
    pub fn transient(reason: impl Into<String>) -> Self {
        ExecutionOutcome::TransientFailure {
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        ExecutionOutcome::PermanentFailure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOutcome::Success => f.write_str("success"),
            ExecutionOutcome::RateLimited {
                retry_after: Some(after),
            } => write!(f, "rate limited (retry after {}s)", after.as_secs()),
            ExecutionOutcome::RateLimited { retry_after: None } => f.write_str("rate limited"),
            ExecutionOutcome::TransientFailure { reason } => write!(f, "transient failure: {reason}"),
            ExecutionOutcome::PermanentFailure { reason } => write!(f, "permanent failure: {reason}"),
        }
    }
}

/// Map an HTTP status (and `Retry-After` header value) to an outcome.
pub fn classify_status(status: u16, retry_after: Option<&str>) -> ExecutionOutcome {
    match status {
        200..=299 => ExecutionOutcome::Success,
        429 => ExecutionOutcome::RateLimited {
            retry_after: retry_after.and_then(parse_retry_after),
        },
        408 | 500..=599 => ExecutionOutcome::transient(format!("HTTP {status}")),
        400..=499 => ExecutionOutcome::permanent(format!("HTTP {status}")),
        _ => ExecutionOutcome::transient(format!("unexpected HTTP {status}")),
    }
}

/// `Retry-After` in delta-seconds form. HTTP dates are not honoured.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
