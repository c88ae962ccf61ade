//! Circuit breaker configuration for endpoint resilience.
//!
//! Defines the YAML format for the per-endpoint circuit breakers, which stop
//! requests to an endpoint that keeps failing.
//!
//! Default values for thresholds and timeouts are sourced from `crate::constants`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::constants::{
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_HALF_OPEN_MAX_REQUESTS, DEFAULT_MAX_TRACKED_ENDPOINTS,
    DEFAULT_RESET_TIMEOUT_SECS, DEFAULT_SUCCESS_THRESHOLD,
};

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_success_threshold() -> u32 {
    DEFAULT_SUCCESS_THRESHOLD
}

fn default_reset_timeout_seconds() -> u64 {
    DEFAULT_RESET_TIMEOUT_SECS
}

fn default_half_open_max_requests() -> u32 {
    DEFAULT_HALF_OPEN_MAX_REQUESTS
}

fn default_max_endpoints() -> u64 {
    DEFAULT_MAX_TRACKED_ENDPOINTS
}

/// Circuit breaker configuration (YAML format)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfigYaml {
    /// Number of consecutive failures to open circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Number of successes in half-open to close circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// How long an open circuit waits before a trial request (seconds)
    #[serde(default = "default_reset_timeout_seconds")]
    pub reset_timeout_seconds: u64,
    /// Max concurrent test requests in half-open state
    #[serde(default = "default_half_open_max_requests")]
    pub half_open_max_requests: u32,
    /// Number of endpoints tracked before the least recently used is dropped
    #[serde(default = "default_max_endpoints")]
    pub max_endpoints: u64,
}

impl Default for CircuitBreakerConfigYaml {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            reset_timeout_seconds: default_reset_timeout_seconds(),
            half_open_max_requests: default_half_open_max_requests(),
            max_endpoints: default_max_endpoints(),
        }
    }
}

impl CircuitBreakerConfigYaml {
    /// Convert to CircuitBreakerConfig from circuit_breaker module
    pub fn to_circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            reset_timeout: Duration::from_secs(self.reset_timeout_seconds),
            half_open_max_requests: self.half_open_max_requests,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("circuit_breaker.failure_threshold must be at least 1".to_string());
        }
        if self.success_threshold == 0 {
            return Err("circuit_breaker.success_threshold must be at least 1".to_string());
        }
        if self.half_open_max_requests == 0 {
            return Err("circuit_breaker.half_open_max_requests must be at least 1".to_string());
        }
        if self.max_endpoints == 0 {
            return Err("circuit_breaker.max_endpoints must be at least 1".to_string());
        }
        Ok(())
    }
}
