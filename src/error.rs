//! Per-attempt failure taxonomy shared by steps and the executor.
//!
//! These are the error kinds a single step attempt can produce. Build-time
//! errors live in [`crate::graph::GraphError`]; persistence errors live in
//! [`crate::store::StoreError`].

use serde::{Deserialize, Serialize};

/// Input or output failed a constraint check.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[error("validation failed: {message}")]
pub struct ValidationError {
    pub message: String,
    pub field: Option<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), field: None }
    }

    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// User step code returned an error, or a validated input/output check failed.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[error("handler error: {message}")]
pub struct HandlerError {
    pub message: String,
    pub code: Option<String>,
    /// Whether this specific failure should be retried if attempts remain.
    /// A fatal (non-retryable) handler error exhausts retries immediately.
    pub retryable: bool,
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self { message: message.into(), code: None, retryable: true }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self { message: message.into(), code: None, retryable: false }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// A per-attempt deadline was exceeded.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[error("step timed out after {timeout_seconds}s")]
pub struct TimeoutError {
    pub timeout_seconds: u64,
}

/// The run was cancelled at a safe boundary.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[error("run was cancelled")]
pub struct CancelledError;

/// A conditional gate's own evaluation failed (distinct from the handler failing).
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[error("condition evaluation failed: {message}")]
pub struct ConditionError {
    pub message: String,
}

impl ConditionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// The union of everything that can end a single step attempt.
///
/// This is the type persisted on [`crate::store::StepExecution::error`] and
/// [`crate::store::WorkflowRun::error`], and the error kind surfaced on
/// `WorkflowRun.error.kind`.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq)]
pub enum StepFailure {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    Cancelled(#[from] CancelledError),
    #[error(transparent)]
    Condition(#[from] ConditionError),
}

impl StepFailure {
    /// Programmatic error kind, as surfaced on `WorkflowRun.error`/`StepExecution.error`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Handler(_) => "HandlerError",
            Self::Timeout(_) => "TimeoutError",
            Self::Cancelled(_) => "CancelledError",
            Self::Condition(_) => "ConditionError",
        }
    }

    /// Whether this failure is eligible for another retry attempt, independent
    /// of whether attempts remain. Cancellation is never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => true,
            Self::Handler(e) => e.retryable,
            Self::Timeout(_) => true,
            Self::Cancelled(_) => false,
            Self::Condition(_) => false,
        }
    }
}

/// A compact, user-visible record of why a run or step ended badly.
///
/// Carried on `WorkflowRun.error` and in the `step_failed` /
/// `workflow_failed` / `persistence_error` events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl From<&StepFailure> for ErrorInfo {
    fn from(failure: &StepFailure) -> Self {
        Self {
            kind: failure.kind().to_string(),
            message: failure.to_string(),
            details: None,
        }
    }
}

impl ErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into(), details: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_retryability() {
        assert!(StepFailure::Handler(HandlerError::retryable("x")).is_retryable());
        assert!(!StepFailure::Handler(HandlerError::fatal("x")).is_retryable());
    }

    #[test]
    fn cancelled_is_never_retryable() {
        assert!(!StepFailure::Cancelled(CancelledError).is_retryable());
    }

    #[test]
    fn kind_strings_match_taxonomy() {
        assert_eq!(StepFailure::Validation(ValidationError::new("x")).kind(), "ValidationError");
        assert_eq!(StepFailure::Timeout(TimeoutError { timeout_seconds: 5 }).kind(), "TimeoutError");
        assert_eq!(StepFailure::Condition(ConditionError::new("x")).kind(), "ConditionError");
    }

    #[test]
    fn error_info_from_failure() {
        let failure = StepFailure::Handler(HandlerError::fatal("boom"));
        let info = ErrorInfo::from(&failure);
        assert_eq!(info.kind, "HandlerError");
        assert!(info.message.contains("boom"));
    }
}
