//! Retry decisions and backoff computation for node failures.
//!
//! Stateless: every function takes the node's policy and the attempt number
//! (1-based, the first execution is attempt 1).

use std::time::Duration;

use weft_types::workflow::{BackoffCurve, ErrorPolicy};

pub struct RetryHandler;

impl RetryHandler {
    /// Should a failed attempt be retried?
    ///
    /// Only `retry` policies retry, only for retryable failures, and only
    /// while `attempt < max_attempts`.
    pub fn should_retry(policy: &ErrorPolicy, attempt: u32, retryable: bool) -> bool {
        match policy {
            ErrorPolicy::Retry { max_attempts, .. } => retryable && attempt < *max_attempts,
            ErrorPolicy::Stop | ErrorPolicy::Continue => false,
        }
    }

    /// Delay to wait after failed `attempt` before the next one.
    ///
    /// `fixed` waits `base`, `linear` waits `base * attempt`, `exponential`
    /// waits `base * 2^(attempt-1)`. The result never exceeds `max`.
    pub fn backoff_delay(curve: BackoffCurve, base_ms: u64, attempt: u32, max_ms: u64) -> Duration {
        let attempt = attempt.max(1);
        let ms = match curve {
            BackoffCurve::Fixed => base_ms,
            BackoffCurve::Linear => base_ms.saturating_mul(u64::from(attempt)),
            BackoffCurve::Exponential => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                base_ms.saturating_mul(factor)
            }
        };
        Duration::from_millis(ms.min(max_ms))
    }

    /// Backoff for a policy, falling back to `default_curve` when the policy
    /// does not name one. Non-retry policies never wait.
    pub fn delay_for(
        policy: &ErrorPolicy,
        attempt: u32,
        default_curve: BackoffCurve,
        max_ms: u64,
    ) -> Duration {
        match policy {
            ErrorPolicy::Retry {
                backoff_ms,
                backoff,
                ..
            } => Self::backoff_delay(backoff.unwrap_or(default_curve), *backoff_ms, attempt, max_ms),
            ErrorPolicy::Stop | ErrorPolicy::Continue => Duration::ZERO,
        }
    }
}
