//! Retry configuration for request resilience.
//!
//! Defines the YAML format for the default retry policy applied to requests
//! that do not carry their own.
//!
//! Default values for attempts, delays and factor are sourced from `crate::constants`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS,
};
use crate::retry::{BackoffKind, RetryPolicy};

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_initial_delay_ms() -> u64 {
    DEFAULT_INITIAL_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

fn default_factor() -> f64 {
    DEFAULT_BACKOFF_FACTOR
}

/// Retry configuration (YAML format)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfigYaml {
    /// Maximum number of attempts (including initial attempt)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// linear or exponential
    #[serde(default)]
    pub backoff: BackoffKind,
    /// Delay after the first failed attempt in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Exponential growth factor
    #[serde(default = "default_factor")]
    pub factor: f64,
}

impl Default for RetryConfigYaml {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffKind::default(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
        }
    }
}

impl RetryConfigYaml {
    /// Convert to RetryPolicy from retry module
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            factor: self.factor,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(format!(
                "retry.factor must be a finite number >= 1.0, got {}",
                self.factor
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(format!(
                "retry.initial_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.initial_delay_ms, self.max_delay_ms
            ));
        }
        Ok(())
    }
}
