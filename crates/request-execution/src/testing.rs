//! Scripted transport for exercising delivery without a network.

use crate::{ExecutionOutcome, RequestExecutionService};
use async_trait::async_trait;
use delivery_core::Endpoint;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// One call observed by [`ScriptedExecutionService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub endpoint: Endpoint,
    pub payload: Vec<u8>,
}

/// Answers calls from a queue of outcomes, then with a fallback outcome,
/// and records everything it was asked to send.
#[derive(Debug)]
pub struct ScriptedExecutionService {
    script: Mutex<VecDeque<ExecutionOutcome>>,
    fallback: Mutex<ExecutionOutcome>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedExecutionService {
    pub fn new(fallback: ExecutionOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(ExecutionOutcome::Success)
    }

    /// Queue `outcome` for the next unanswered call.
    pub fn push(&self, outcome: ExecutionOutcome) {
        self.script.lock().push_back(outcome);
    }

    pub fn set_fallback(&self, outcome: ExecutionOutcome) {
        *self.fallback.lock() = outcome;
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl RequestExecutionService for ScriptedExecutionService {
    async fn execute(&self, endpoint: Endpoint, payload: Vec<u8>) -> ExecutionOutcome {
        self.calls.lock().push(RecordedCall { endpoint, payload });
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.fallback.lock().clone())
    }
}
