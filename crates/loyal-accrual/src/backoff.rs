//! Retry delays for gateway calls.
//!
//! `compute_delay(attempt) = min(base_delay * 2^attempt, max_delay)` with
//! `attempt` starting at 0. No jitter. A retry hint from the authority
//! replaces the computed value for the next attempt only; that hint lives in
//! the per-order [`AttemptContext`], never in the shared policy.

use std::time::Duration;

use crate::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Gateway calls per order per reconciliation cycle.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// Never exceeds `max_delay`; saturates instead of overflowing.
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    pub fn should_retry(&self, err: &GatewayError) -> bool {
        err.is_retryable()
    }

    /// Raw status check: 429 and 5xx are worth retrying.
    pub fn should_retry_status(status: u16) -> bool {
        status == 429 || (500..=599).contains(&status)
    }
}

/// Retry state for one order within one cycle.
#[derive(Debug, Clone, Default)]
pub struct AttemptContext {
    failures: u32,
    hint: Option<Duration>,
}

impl AttemptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_failure(&mut self, err: &GatewayError) {
        self.failures = self.failures.saturating_add(1);
        self.hint = err.retry_hint();
    }

    /// Another call is allowed if the last error was retryable and the
    /// per-cycle ceiling has not been reached.
    pub fn can_retry(&self, policy: &BackoffPolicy, err: &GatewayError) -> bool {
        policy.should_retry(err) && self.failures < policy.max_attempts
    }

    /// Delay before the next call. Consumes the retry hint if one was given.
    pub fn next_delay(&mut self, policy: &BackoffPolicy) -> Duration {
        match self.hint.take() {
            Some(hint) => hint,
            None => policy.compute_delay(self.failures.saturating_sub(1)),
        }
    }
}
