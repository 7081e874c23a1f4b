//! Pure backoff delay calculation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff strategy used between retry attempts.
///
/// Unrecognized strategy names encountered during deserialization fall back
/// to [`BackoffStrategy::Linear`], matching the wire-compatibility rule
/// spec'd for `retryBackoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackoffStrategy {
    None,
    Exponential,
    #[serde(other)]
    Linear,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Linear
    }
}

/// Compute the delay before the next retry, given the 1-indexed count of
/// attempts made so far. `attempt == 0` is a sentinel for "no attempt was
/// made" and always yields no delay. `base` is `retryDelayMs` as a
/// [`Duration`].
pub fn compute_delay(base: Duration, attempt: u32, strategy: BackoffStrategy) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    match strategy {
        BackoffStrategy::None => Duration::ZERO,
        BackoffStrategy::Linear => base.saturating_mul(attempt),
        BackoffStrategy::Exponential => {
            let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
            base.saturating_mul(factor)
        }
    }
}
