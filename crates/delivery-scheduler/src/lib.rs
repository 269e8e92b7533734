//! Delivery scheduling.
//!
//! [`SchedulingService`] decides when stored payloads are sent. A pass walks
//! the payload store and hands every complete payload to the transport.
//! Failures wait in a bounded pending queue and are retried by a single
//! process-wide retry task with exponential backoff. Rate-limited endpoints
//! are paused on their own without holding up the others, and their calls
//! are resent only by the endpoint's own timer. An endpoint whose backoff
//! passes the cap waits for a connectivity change. Losing the
//! network cancels the waiting retry; regaining it retries immediately.

mod pending;
mod retry;
mod service;

pub use pending::{PendingApiCall, PendingApiCalls};
pub use retry::next_retry_delay;
pub use service::{PassSummary, SchedulerConfig, SchedulingService};
