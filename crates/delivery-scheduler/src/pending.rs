//! Bounded queue of calls waiting for a retry.

use delivery_core::{Endpoint, StoredTelemetryMetadata};
use std::collections::VecDeque;

/// A failed request waiting to be retried. The payload stays in the store;
/// only its metadata is held here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingApiCall {
    pub endpoint: Endpoint,
    pub metadata: StoredTelemetryMetadata,
    /// Attempts made so far.
    pub attempts: u32,
}

impl PendingApiCall {
    pub fn new(metadata: StoredTelemetryMetadata) -> Self {
        Self {
            endpoint: metadata.endpoint(),
            metadata,
            attempts: 0,
        }
    }

    pub fn next_attempt(mut self) -> Self {
        self.attempts = self.attempts.saturating_add(1);
        self
    }
}

/// FIFO of pending calls that never grows past its capacity.
#[derive(Debug)]
pub struct PendingApiCalls {
    calls: VecDeque<PendingApiCall>,
    capacity: usize,
}

impl PendingApiCalls {
    pub fn new(capacity: usize) -> Self {
        Self {
            calls: VecDeque::new(),
            capacity,
        }
    }

    /// Append `call`. A full queue hands the call back instead of growing.
    /// A call for metadata already queued replaces the queued one.
    pub fn push(&mut self, call: PendingApiCall) -> Result<(), PendingApiCall> {
        if let Some(existing) = self.calls.iter_mut().find(|c| c.metadata == call.metadata) {
            *existing = call;
            return Ok(());
        }
        if self.calls.len() >= self.capacity {
            return Err(call);
        }
        self.calls.push_back(call);
        Ok(())
    }

    /// Remove and return every call accepted by `predicate`, oldest first.
    pub fn take_matching(&mut self, predicate: impl Fn(&PendingApiCall) -> bool) -> Vec<PendingApiCall> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.calls.len());
        for call in self.calls.drain(..) {
            if predicate(&call) {
                taken.push(call);
            } else {
                kept.push_back(call);
            }
        }
        self.calls = kept;
        taken
    }

    pub fn count_matching(&self, predicate: impl Fn(&PendingApiCall) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }

    pub fn contains(&self, metadata: &StoredTelemetryMetadata) -> bool {
        self.calls.iter().any(|c| &c.metadata == metadata)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn snapshot(&self) -> Vec<PendingApiCall> {
        self.calls.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delivery_core::{EnvelopeKind, ProcessIdentifier};

    fn call(kind: EnvelopeKind, timestamp_ms: i64) -> PendingApiCall {
        PendingApiCall::new(StoredTelemetryMetadata::with_timestamp(
            kind,
            timestamp_ms,
            &ProcessIdentifier::from("proc"),
            true,
        ))
    }

    #[test]
    fn test_queue_never_exceeds_capacity() {
        let mut queue = PendingApiCalls::new(200);
        for i in 0..200 {
            queue.push(call(EnvelopeKind::Log, i)).unwrap();
        }

        let overflow = call(EnvelopeKind::Log, 200);
        let rejected = queue.push(overflow.clone()).unwrap_err();

        assert_eq!(rejected, overflow);
        assert_eq!(queue.len(), 200);
        assert!(!queue.contains(&overflow.metadata));
    }

    #[test]
    fn test_push_replaces_call_for_same_payload() {
        let mut queue = PendingApiCalls::new(1);
        let first = call(EnvelopeKind::Session, 1);
        queue.push(first.clone()).unwrap();

        queue.push(first.clone().next_attempt().next_attempt()).unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.snapshot()[0].attempts, 2);
    }

    #[test]
    fn test_take_matching_preserves_order_of_rest() {
        let mut queue = PendingApiCalls::new(10);
        let a = call(EnvelopeKind::Log, 1);
        let b = call(EnvelopeKind::Session, 2);
        let c = call(EnvelopeKind::Log, 3);
        for item in [&a, &b, &c] {
            queue.push(item.clone()).unwrap();
        }

        let logs = queue.take_matching(|c| c.endpoint == Endpoint::Logs);

        assert_eq!(logs, vec![a, c]);
        assert_eq!(queue.snapshot(), vec![b]);
    }
}
