//! The context object handed to step handlers and condition functions.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::accessor::{AccessorError, DataAccessor, StateAccessor};

/// Run id, step id, attempt number, cancellation, and cache-through
/// accessors — everything a handler or condition needs.
///
/// Handlers must not capture a `StepContext` across runs; accessors are
/// run-scoped.
#[derive(Clone)]
pub struct StepContext {
    run_id: Uuid,
    step_id: String,
    attempt: u32,
    cancellation: CancellationToken,
    data: Arc<DataAccessor>,
    state: Arc<StateAccessor>,
    user_context: Option<Arc<Vec<u8>>>,
}

impl StepContext {
    pub fn new(
        run_id: Uuid,
        step_id: impl Into<String>,
        attempt: u32,
        cancellation: CancellationToken,
        data: Arc<DataAccessor>,
        state: Arc<StateAccessor>,
        user_context: Option<Arc<Vec<u8>>>,
    ) -> Self {
        Self { run_id, step_id: step_id.into(), attempt, cancellation, data, state, user_context }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn data(&self) -> &DataAccessor {
        &self.data
    }

    pub fn state(&self) -> &StateAccessor {
        &self.state
    }

    /// Deserialize the workflow's opaque user context, if one was set.
    pub fn user_context<T: DeserializeOwned>(&self) -> Result<Option<T>, AccessorError> {
        match &self.user_context {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }
}
