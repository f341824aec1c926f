//! Retry and backoff decisions for capability calls and reconnects.
//!
//! Delays are exponential: `base * 2^n`, capped at `max_delay`. The same
//! shape drives both the per-call retry loop in the stage processor and the
//! reconnect loop in the supervisor, with independent counters.

use std::time::Duration;

use crate::capability::{CapabilityError, ErrorKind};

/// Limits for retrying one capability invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first call.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given delay, then call again.
    RetryAfter(Duration),
    /// Stop. The error is terminal for this invocation.
    GiveUp,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        exponential(self.base_delay, self.max_delay, retry)
    }

    /// Classify `err`. Kept on the policy so callers never inspect messages.
    pub fn classify(&self, err: &CapabilityError) -> ErrorKind {
        err.kind
    }

    /// Decide after attempt number `attempt` (1-based) failed with `err`.
    pub fn decide(&self, err: &CapabilityError, attempt: u32) -> RetryDecision {
        if self.classify(err) == ErrorKind::Fatal || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.delay_for(attempt.saturating_sub(1)))
    }
}

/// Reconnect backoff counter.
///
/// Owned by whoever runs the reconnect loop and reset on every successful
/// connect. Tests can build one mid-sequence with [`Backoff::starting_at`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Start from an arbitrary number of prior failures.
    pub fn starting_at(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Failures recorded since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay to wait now, advancing the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = exponential(self.base, self.max, self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

fn exponential(base: Duration, max: Duration, n: u32) -> Duration {
    let factor = 2u32.checked_pow(n).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}
