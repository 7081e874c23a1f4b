//! Per-step / workflow-default execution configuration.

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffStrategy;

/// Retry/timeout/error-handling policy for a single step.
///
/// `Default` yields the standard defaults: 3 retries (4 total
/// attempts), 1000ms base delay, linear backoff, 30s timeout,
/// `continue_on_error = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff: BackoffStrategy,
    pub timeout_seconds: u64,
    pub continue_on_error: bool,
    /// Reserved for future use; ignored by the reference scheduler.
    pub max_concurrency: Option<usize>,
    /// Reserved; implementations SHOULD ignore unless extending the protocol.
    pub fallback_step_id: Option<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            retry_backoff: BackoffStrategy::Linear,
            timeout_seconds: 30,
            continue_on_error: false,
            max_concurrency: None,
            fallback_step_id: None,
        }
    }
}

impl ExecutionConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.retry_backoff = strategy;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Total attempts permitted: `1 + max_retries`.
    pub fn total_attempts(&self) -> u32 {
        1 + self.max_retries
    }

    pub fn has_timeout(&self) -> bool {
        self.timeout_seconds > 0
    }
}
