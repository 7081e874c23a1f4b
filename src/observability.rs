//! Structured events emitted over a run's lifetime.
//!
//! Event names and required fields follow a fixed table. Every event is
//! both a `tracing` event (for log aggregation) and a call into the
//! pluggable [`Observer`] (for tests and in-process metrics), mirroring the
//! dual emission the sibling crate's executor uses for its own
//! workflow/activity lifecycle events.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorInfo;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    WorkflowCreated { run_id: Uuid, workflow_id: String, resource_id: Option<String> },
    WorkflowStarted { run_id: Uuid, workflow_id: String, resource_id: Option<String> },
    WorkflowProgress { run_id: Uuid, progress: f64 },
    WorkflowCompleted { run_id: Uuid, duration_ms: i64 },
    WorkflowFailed { run_id: Uuid, error: ErrorInfo },
    WorkflowCancelled { run_id: Uuid },
    StepStarted { run_id: Uuid, step_id: String, step_name: String, step_num: usize, total_steps: usize },
    StepRetrying { run_id: Uuid, step_id: String, attempt: u32, delay: u64 },
    StepCompleted { run_id: Uuid, step_id: String, duration_ms: i64, attempts: u32 },
    StepFailed { run_id: Uuid, step_id: String, error: ErrorInfo, attempt: u32, duration_ms: i64 },
    StepSkipped { run_id: Uuid, step_id: String, reason: String },
    PersistenceError { run_id: Uuid, operation: String, error: String },
}

/// Receives every [`Event`] the engine and executor emit. The default
/// `NoopObserver` does nothing; tests and callers that want exact
/// event-sequence assertions or metrics supply their own.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: Event);
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn on_event(&self, _event: Event) {}
}

/// Emits each event through `tracing` at an appropriate level, then forwards
/// it to an inner [`Observer`]. This is what [`crate::engine::Engine`] uses
/// by default; wrap a custom `Observer` in this to keep both log lines and
/// structured callbacks.
pub struct TracingObserver {
    inner: Arc<dyn Observer>,
}

impl TracingObserver {
    pub fn new(inner: Arc<dyn Observer>) -> Self {
        Self { inner }
    }
}

impl Observer for TracingObserver {
    fn on_event(&self, event: Event) {
        match &event {
            Event::WorkflowCreated { run_id, workflow_id, resource_id } => {
                tracing::info!(%run_id, %workflow_id, ?resource_id, "workflow created");
            }
            Event::WorkflowStarted { run_id, workflow_id, resource_id } => {
                tracing::info!(%run_id, %workflow_id, ?resource_id, "workflow started");
            }
            Event::WorkflowProgress { run_id, progress } => {
                tracing::debug!(%run_id, progress, "workflow progress");
            }
            Event::WorkflowCompleted { run_id, duration_ms } => {
                tracing::info!(%run_id, duration_ms, "workflow completed");
            }
            Event::WorkflowFailed { run_id, error } => {
                tracing::error!(%run_id, kind = %error.kind, message = %error.message, "workflow failed");
            }
            Event::WorkflowCancelled { run_id } => {
                tracing::warn!(%run_id, "workflow cancelled");
            }
            Event::StepStarted { run_id, step_id, step_name, step_num, total_steps } => {
                tracing::info!(%run_id, %step_id, %step_name, step_num, total_steps, "step started");
            }
            Event::StepRetrying { run_id, step_id, attempt, delay } => {
                tracing::info!(%run_id, %step_id, attempt, delay, "step retrying");
            }
            Event::StepCompleted { run_id, step_id, duration_ms, attempts } => {
                tracing::info!(%run_id, %step_id, duration_ms, attempts, "step completed");
            }
            Event::StepFailed { run_id, step_id, error, attempt, duration_ms } => {
                tracing::warn!(%run_id, %step_id, attempt, duration_ms, kind = %error.kind, message = %error.message, "step failed");
            }
            Event::StepSkipped { run_id, step_id, reason } => {
                tracing::info!(%run_id, %step_id, reason, "step skipped");
            }
            Event::PersistenceError { run_id, operation, error } => {
                tracing::error!(%run_id, operation, error, "persistence error");
            }
        }
        self.inner.on_event(event);
    }
}
