//! Retry policy for retryable units.
//!
//! The policy is a plain record handed to the substrate together with the
//! unit. [`execute_with_retry`] is the attempt loop used by
//! [`LocalSubstrate`](crate::substrate::LocalSubstrate); a real substrate
//! applies the same record with its own scheduler.

use crate::errors::{MessagingError, MessagingResult};
use crate::types::{duration_millis, option_duration_millis};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff and attempt limits for one retryable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the second attempt
    #[serde(with = "duration_millis", rename = "initial_interval_ms")]
    pub initial_interval: Duration,

    /// Growth factor applied per attempt
    pub backoff_coefficient: f64,

    /// Upper bound on any single delay
    #[serde(with = "duration_millis", rename = "maximum_interval_ms")]
    pub maximum_interval: Duration,

    /// Total attempts including the first (0 = unlimited)
    pub maximum_attempts: u32,

    /// Per-attempt deadline
    #[serde(
        with = "option_duration_millis",
        rename = "start_to_close_timeout_ms",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub start_to_close_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(100),
            maximum_attempts: 3,
            start_to_close_timeout: Some(Duration::from_secs(300)), // 5 minutes
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            maximum_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_maximum_attempts(mut self, attempts: u32) -> Self {
        self.maximum_attempts = attempts;
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    pub fn with_maximum_interval(mut self, interval: Duration) -> Self {
        self.maximum_interval = interval;
        self
    }

    pub fn with_start_to_close_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.start_to_close_timeout = timeout;
        self
    }

    /// Check the policy is usable.
    pub fn validate(&self) -> MessagingResult<()> {
        if !self.backoff_coefficient.is_finite() || self.backoff_coefficient < 1.0 {
            return Err(MessagingError::validation(format!(
                "backoff_coefficient must be >= 1.0, got {}",
                self.backoff_coefficient
            )));
        }
        if self.maximum_interval < self.initial_interval {
            return Err(MessagingError::validation(
                "maximum_interval must not be shorter than initial_interval",
            ));
        }
        if self.start_to_close_timeout == Some(Duration::ZERO) {
            return Err(MessagingError::validation(
                "start_to_close_timeout must be non-zero when set",
            ));
        }
        Ok(())
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    pub fn allows_attempt_after(&self, attempt: u32) -> bool {
        self.maximum_attempts == 0 || attempt < self.maximum_attempts
    }

    /// Delay to wait after the given (1-based) failed attempt.
    ///
    /// Returns `None` when the policy allows no further attempt.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if !self.allows_attempt_after(attempt) {
            return None;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_coefficient.powi(exponent);
        let max_secs = self.maximum_interval.as_secs_f64();
        let secs = (self.initial_interval.as_secs_f64() * factor).min(max_secs);
        Some(Duration::from_secs_f64(secs))
    }
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of attempts.
///
/// `on_retry` is called with the failed attempt number, the error and the
/// delay before the next attempt. Exhaustion yields a single
/// `RetriesExhausted` error that carries the last failure as its cause.
pub async fn execute_with_retry<T, F, Fut, R>(
    operation: &str,
    policy: &RetryPolicy,
    mut attempt: F,
    mut on_retry: R,
) -> MessagingResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = MessagingResult<T>>,
    R: FnMut(u32, &MessagingError, Duration),
{
    policy.validate()?;

    let mut number: u32 = 1;
    loop {
        let outcome = match policy.start_to_close_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt(number)).await {
                Ok(result) => result,
                Err(_) => Err(MessagingError::timeout(operation, limit)),
            },
            None => attempt(number).await,
        };

        let error = match outcome {
            Ok(value) => {
                if number > 1 {
                    debug!(operation, attempt = number, "Retryable unit succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !error.is_retryable() {
            debug!(
                operation,
                attempt = number,
                code = %error.code,
                "Non-retryable failure, not retrying"
            );
            return Err(error);
        }

        match policy.delay_after(number) {
            Some(delay) => {
                warn!(
                    operation,
                    attempt = number,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retryable unit failed, retrying"
                );
                on_retry(number, &error, delay);
                tokio::time::sleep(delay).await;
                number += 1;
            }
            None => {
                warn!(operation, attempts = number, error = %error, "Retry policy exhausted");
                return Err(MessagingError::retries_exhausted(operation, number, &error));
            }
        }
    }
}
