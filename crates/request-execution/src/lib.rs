//! Request execution: the only place payload bytes touch the network.
//!
//! [`RequestExecutionService::execute`] sends one payload to one endpoint
//! and reports an [`ExecutionOutcome`]. It keeps no queue or rate-limit
//! state; acting on the outcome is the scheduler's job.

mod error;
mod http;
mod outcome;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{ExecutionError, ExecutionResult};
pub use http::{gzip, ExecutionConfig, HttpRequestExecutionService};
pub use outcome::{classify_status, parse_retry_after, ExecutionOutcome};

use async_trait::async_trait;
use delivery_core::Endpoint;

/// Transport for serialized payloads.
#[async_trait]
pub trait RequestExecutionService: Send + Sync {
    /// Send `payload` to `endpoint`. Never panics on network failure; every
    /// failure is reported as an outcome.
    async fn execute(&self, endpoint: Endpoint, payload: Vec<u8>) -> ExecutionOutcome;
}
