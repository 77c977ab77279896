//! Retry backoff computation for failed step executions.
//!
//! Stateless: all logic is associated functions taking configuration as
//! parameters, same shape as the rest of the workflow module.

use std::time::Duration;

use loomwork_types::workflow::{BackoffStrategy, RetryConfig};

/// Base delay used by both backoff strategies.
const BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on any single computed backoff, regardless of strategy or
/// attempt count.
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Stateless retry policy evaluation.
pub struct RetryHandler;

impl RetryHandler {
    /// Determine whether a retry should be attempted.
    ///
    /// `attempt` is 1-based (first execution is attempt 1). If
    /// `config.retry_on` is set, `error_kind` must match one of its entries
    /// for the retry to proceed; an unset `retry_on` retries any error.
    pub fn should_retry(config: &RetryConfig, attempt: u32, error_kind: &str) -> bool {
        if attempt >= config.max_attempts {
            return false;
        }
        match &config.retry_on {
            Some(kinds) => kinds.iter().any(|k| k == error_kind),
            None => true,
        }
    }

    /// Compute the delay to wait before attempt `attempt + 1`.
    ///
    /// A small deterministic jitter (derived from the step id and attempt
    /// number, not a random source) is mixed in so that many steps
    /// retrying on the same tick don't all wake up at the exact same
    /// instant.
    pub fn backoff_delay(config: &RetryConfig, attempt: u32, step_id: &str) -> Duration {
        let base = match config.backoff {
            BackoffStrategy::Linear => BASE_DELAY.saturating_mul(attempt.max(1)),
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                BASE_DELAY.saturating_mul(factor)
            }
        };
        let jittered = base + jitter(step_id, attempt);
        jittered.min(MAX_DELAY)
    }
}

/// A deterministic pseudo-jitter in the 0..250ms range, derived from the
/// step id and attempt count so repeated retries of the same step don't
/// collide with retries of other steps on the same clock tick.
fn jitter(step_id: &str, attempt: u32) -> Duration {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in step_id.bytes().chain(attempt.to_le_bytes()) {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    Duration::from_millis(hash % 250)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
