//! Retry Logic with Backoff
//!
//! Wraps a single transport call with bounded retry, classifying each failure
//! as retryable or terminal.
//!
//! ## Retryable vs Terminal Errors
//!
//! **Retryable** (tried again while attempts remain):
//! - connectivity failures and per-attempt timeouts
//! - HTTP 5xx, 429 Too Many Requests, 408 Request Timeout
//!
//! **Terminal** (surfaced immediately):
//! - every other HTTP 4xx
//! - cancellation
//! - parse failures of a successful response
//!
//! ## Backoff
//!
//! After failed attempt `n` (1-based) the executor waits:
//! - exponential: `min(max_delay, initial_delay * factor^(n-1))`
//! - linear: `min(max_delay, initial_delay)` every time
//!
//! With the defaults (1000ms, factor 2, 3 attempts) that is 1000ms then 2000ms.
//!
//! ## Configuration Example
//!
//! ```yaml
//! retry:
//!   max_attempts: 3
//!   backoff: exponential
//!   initial_delay_ms: 1000
//!   max_delay_ms: 30000
//!   factor: 2.0
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::constants::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS,
};
use crate::error::RequestError;
use crate::metrics::CoreMetrics;
use crate::request::Response;
use crate::transport::{Transport, TransportRequest};

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Same delay before every retry
    Linear,
    /// Delay multiplied by `factor` after every retry
    #[default]
    Exponential,
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt)
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Cap for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffKind::Exponential,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Create an exponential policy
    pub fn exponential(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        factor: f64,
    ) -> Self {
        Self {
            max_attempts,
            backoff: BackoffKind::Exponential,
            initial_delay,
            max_delay,
            factor,
        }
    }

    /// Create a linear (fixed delay) policy
    pub fn linear(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffKind::Linear,
            initial_delay: delay,
            max_delay: delay,
            factor: 1.0,
        }
    }

    /// A policy that never retries
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after `failed_attempts` attempts have failed.
    ///
    /// Returns zero before the first attempt.
    pub fn backoff_duration(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }

        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.backoff {
            BackoffKind::Linear => initial_ms,
            BackoffKind::Exponential => {
                let exponent = i32::try_from(failed_attempts - 1).unwrap_or(i32::MAX);
                initial_ms * self.factor.powi(exponent)
            }
        };

        // Overflow to infinity (or a NaN factor) falls back to the cap
        let capped = if delay_ms.is_finite() {
            delay_ms.min(max_ms)
        } else {
            max_ms
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Check if we should retry after `attempt` (1-based) failed with `error`
    pub fn should_retry(&self, attempt: u32, error: &RequestError) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }
}

/// Runs one transport call under a retry policy
#[derive(Clone)]
pub struct RetryExecutor {
    transport: Arc<dyn Transport>,
    metrics: Arc<CoreMetrics>,
}

impl RetryExecutor {
    pub fn new(transport: Arc<dyn Transport>, metrics: Arc<CoreMetrics>) -> Self {
        Self { transport, metrics }
    }

    /// Execute `request`, retrying retryable failures per `policy`.
    ///
    /// Non-2xx responses become `HttpError`. When every attempt of a
    /// multi-attempt policy fails retryably the last error is wrapped in
    /// `MaxRetriesExceeded`. Cancellation is checked before each attempt and
    /// raced against both the call and the backoff wait.
    pub async fn execute(
        &self,
        request: &TransportRequest,
        policy: &RetryPolicy,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<Response, RequestError> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if token.is_cancelled() {
                return Err(RequestError::Cancelled);
            }
            attempt += 1;

            let error = match self.attempt(request, timeout, token).await {
                Ok(response) if response.is_success() => {
                    if attempt > 1 {
                        tracing::info!(
                            url = %request.url,
                            attempts = attempt,
                            "Request succeeded after retry"
                        );
                    }
                    return Ok(response);
                }
                Ok(response) => RequestError::HttpError {
                    status: response.status,
                    body: response.text(),
                },
                Err(error) => error,
            };

            if !error.is_retryable() {
                return Err(error);
            }

            if attempt >= max_attempts {
                tracing::warn!(
                    url = %request.url,
                    attempts = attempt,
                    error = %error,
                    "Request failed, retries exhausted"
                );
                return Err(if max_attempts > 1 {
                    RequestError::MaxRetriesExceeded {
                        attempts: attempt,
                        last: Box::new(error),
                    }
                } else {
                    error
                });
            }

            let delay = policy.backoff_duration(attempt);
            self.metrics.record_retry();
            tracing::debug!(
                url = %request.url,
                attempt = attempt,
                max_attempts = max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying request after backoff"
            );

            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(RequestError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(
        &self,
        request: &TransportRequest,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<Response, RequestError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(RequestError::Cancelled),
            result = tokio::time::timeout(timeout, self.transport.send(request, token)) => {
                match result {
                    Ok(outcome) => outcome,
                    Err(_) => Err(RequestError::Timeout(timeout)),
                }
            }
        }
    }
}
