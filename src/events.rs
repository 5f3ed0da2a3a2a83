//! Orchestration event bus
//!
//! An in-memory FIFO decoupling "work discovered" from "work finished". Step
//! tasks publish concurrently; a single drain loop consumes. Every published
//! event is also forwarded to an optional broadcast tap for observers.

use crate::models::{ScanResult, WorkflowStep};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

/// Kind of orchestration event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A step is ready to execute
    ScanStarted,
    /// A step produced a result (completed, failed or scheduled)
    ScanCompleted,
    /// A step ended without being handed to the decision policy
    ScanFailed,
}

/// Event payload: a step, a result, or an error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    /// Step to execute
    Step(WorkflowStep),
    /// Result produced by a step
    Result(ScanResult),
    /// Terminal failure of a step
    Error {
        /// Failed step
        step_id: String,
        /// Agent that failed
        agent: String,
        /// Error text
        error: String,
    },
}

/// A transient event living only on the bus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestrationEvent {
    /// Id of the step the event is about
    pub id: String,
    /// Event kind
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Event payload
    pub payload: EventPayload,
}

impl OrchestrationEvent {
    /// `scan_started` for a step
    pub fn started(step: WorkflowStep) -> Self {
        Self {
            id: step.id.clone(),
            kind: EventKind::ScanStarted,
            payload: EventPayload::Step(step),
        }
    }

    /// `scan_completed` carrying the step's result
    pub fn completed(step_id: &str, result: ScanResult) -> Self {
        Self {
            id: step_id.to_string(),
            kind: EventKind::ScanCompleted,
            payload: EventPayload::Result(result),
        }
    }

    /// `scan_failed` carrying the error text
    pub fn failed(step: &WorkflowStep, error: impl Into<String>) -> Self {
        Self {
            id: step.id.clone(),
            kind: EventKind::ScanFailed,
            payload: EventPayload::Error {
                step_id: step.id.clone(),
                agent: step.agent.clone(),
                error: error.into(),
            },
        }
    }
}

/// FIFO of orchestration events
#[derive(Debug, Default)]
pub struct EventBus {
    queue: Mutex<VecDeque<OrchestrationEvent>>,
    tap: Option<broadcast::Sender<OrchestrationEvent>>,
}

impl EventBus {
    /// Create an empty bus with no observers
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty bus that forwards every published event to `tap`
    pub fn with_tap(tap: broadcast::Sender<OrchestrationEvent>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            tap: Some(tap),
        }
    }

    // Critical sections never panic, so a poisoned lock still holds a valid queue.
    fn queue(&self) -> MutexGuard<'_, VecDeque<OrchestrationEvent>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an event to the tail
    pub fn publish(&self, event: OrchestrationEvent) {
        if let Some(tap) = &self.tap {
            // No receivers is fine.
            let _ = tap.send(event.clone());
        }
        self.queue().push_back(event);
    }

    /// Remove and return the head, or `None` when empty
    pub fn consume(&self) -> Option<OrchestrationEvent> {
        self.queue().pop_front()
    }

    /// Number of pending events
    pub fn size(&self) -> usize {
        self.queue().len()
    }

    /// Whether no event is pending
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}
