//! Retry policy and its pure evaluator.
//!
//! The evaluator never reads a clock: every time input is supplied by the
//! caller from the replay-consistent clock, so identical inputs always yield
//! identical decisions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ActivityFailure, TimeoutKind};

/// Outcome of one retry evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    fn stop() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
        }
    }

    fn after(delay: Duration) -> Self {
        Self { retry: true, delay }
    }
}

/// Rules governing whether and how long to wait before re-attempting a
/// failed activity. Immutable; shared across all attempts of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub maximum_interval: Duration,
    pub backoff_coefficient: f64,
    /// 0 means unlimited attempts.
    pub maximum_attempts: u32,
    /// Failure type names that are never retried.
    pub non_retryable_error_types: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            maximum_interval: Duration::from_secs(100),
            backoff_coefficient: 2.0,
            maximum_attempts: 0,
            non_retryable_error_types: Vec::new(),
        }
    }
}

impl RetryPolicy {
    pub fn new(maximum_attempts: u32) -> Self {
        Self {
            maximum_attempts,
            ..Default::default()
        }
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_maximum_interval(mut self, interval: Duration) -> Self {
        self.maximum_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    pub fn with_maximum_attempts(mut self, attempts: u32) -> Self {
        self.maximum_attempts = attempts;
        self
    }

    pub fn with_non_retryable(mut self, error_type: impl Into<String>) -> Self {
        self.non_retryable_error_types.push(error_type.into());
        self
    }

    /// Backoff before the attempt following attempt `attempt`:
    /// `min(initial_interval * backoff_coefficient^(attempt - 1), maximum_interval)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled =
            self.initial_interval.as_millis() as f64 * self.backoff_coefficient.powi(exponent);
        let cap = self.maximum_interval.as_millis() as f64;
        let millis = if scaled.is_finite() { scaled.min(cap) } else { cap };
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Decide whether attempt `attempt`, which ended with `failure` after
    /// `elapsed` since the first schedule, should be retried, and after what
    /// delay. `schedule_to_close` is the overall deadline from the options,
    /// if configured.
    ///
    /// Stops when the failure is a cancellation, a schedule-to-close timeout,
    /// a non-retryable application error, the attempt budget is exhausted, or
    /// the next attempt could not fit inside `schedule_to_close`.
    pub fn decide(
        &self,
        attempt: u32,
        elapsed: Duration,
        schedule_to_close: Option<Duration>,
        failure: &ActivityFailure,
    ) -> RetryDecision {
        if failure.is_canceled() {
            return RetryDecision::stop();
        }
        if failure.timeout_kind() == Some(TimeoutKind::ScheduleToClose) {
            return RetryDecision::stop();
        }
        if let ActivityFailure::Application {
            error_type,
            non_retryable,
            ..
        } = failure
        {
            if *non_retryable {
                return RetryDecision::stop();
            }
            if self
                .non_retryable_error_types
                .iter()
                .any(|t| t == error_type)
            {
                return RetryDecision::stop();
            }
        }
        if self.maximum_attempts > 0 && attempt >= self.maximum_attempts {
            return RetryDecision::stop();
        }
        let delay = self.delay_for_attempt(attempt);
        if let Some(cap) = schedule_to_close {
            if elapsed + delay > cap {
                return RetryDecision::stop();
            }
        }
        RetryDecision::after(delay)
    }
}
