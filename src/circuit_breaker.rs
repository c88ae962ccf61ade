//! Circuit Breaker Pattern Implementation
//!
//! Fails fast when an endpoint keeps failing instead of hammering it with
//! retries.
//!
//! State Machine:
//! - **Closed**: Normal operation, requests pass through
//! - **Open**: Too many consecutive failures, reject requests immediately
//!   with `CircuitOpen` until `next_attempt_at`
//! - **Half-Open**: After the reset timeout, admit a bounded number of trial
//!   requests
//!   - Success → Closed (after `success_threshold` successes)
//!   - Failure → Open
//!
//! Configuration:
//! - `failure_threshold`: Number of consecutive failures to open circuit
//! - `success_threshold`: Number of successes in half-open to close circuit
//! - `reset_timeout`: How long to stay open before admitting a trial request
//! - `half_open_max_requests`: Max concurrent trial requests in half-open state
//!
//! Every read-then-write transition runs under one per-breaker lock.
//! Admission hands out a [`BreakerPermit`]; the outcome is recorded through
//! the permit, and a permit dropped without an outcome gives its half-open
//! slot back.

use moka::sync::Cache;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::constants::{
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_HALF_OPEN_MAX_REQUESTS, DEFAULT_MAX_TRACKED_ENDPOINTS,
    DEFAULT_RESET_TIMEOUT_SECS, DEFAULT_SUCCESS_THRESHOLD,
};
use crate::error::RequestError;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Too many failures - reject requests immediately
    Open,
    /// Testing if backend recovered - allow limited requests
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures to open circuit
    pub failure_threshold: u32,
    /// Number of successes in half-open to close circuit
    pub success_threshold: u32,
    /// How long to stay open before admitting a trial request
    pub reset_timeout: Duration,
    /// Max concurrent trial requests in half-open state
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            reset_timeout: Duration::from_secs(DEFAULT_RESET_TIMEOUT_SECS),
            half_open_max_requests: DEFAULT_HALF_OPEN_MAX_REQUESTS,
        }
    }
}

/// Read-only snapshot of one breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerState {
    pub endpoint: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Instant>,
    pub next_attempt_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    last_failure_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
    // Bumped on every transition; permits from an older generation no longer
    // own a half-open slot
    generation: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            half_open_in_flight: 0,
            last_failure_at: None,
            next_attempt_at: None,
            generation: 0,
        }
    }

    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.half_open_successes = 0;
        self.half_open_in_flight = 0;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Circuit breaker for one endpoint. Clones share state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    endpoint: Arc<str>,
    inner: Arc<Mutex<BreakerInner>>,
    config: Arc<CircuitBreakerConfig>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(endpoint: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            endpoint: Arc::from(endpoint.into()),
            inner: Arc::new(Mutex::new(BreakerInner::new())),
            config: Arc::new(config),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.inner.lock();
        CircuitBreakerState {
            endpoint: self.endpoint.to_string(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_at: inner.last_failure_at,
            next_attempt_at: inner.next_attempt_at,
        }
    }

    /// Ask to send one request through the breaker.
    ///
    /// An open breaker whose `next_attempt_at` has passed moves to half-open
    /// and admits this request as a trial.
    pub fn try_acquire(&self) -> Result<BreakerPermit, RequestError> {
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let ready = inner
                .next_attempt_at
                .map_or(true, |at| Instant::now() >= at);
            if !ready {
                return Err(self.rejected());
            }
            tracing::info!(
                endpoint = %self.endpoint,
                "Circuit breaker timeout elapsed, transitioning to half-open"
            );
            inner.transition(CircuitState::HalfOpen);
        }

        match inner.state {
            CircuitState::Closed => Ok(self.permit(false, inner.generation)),
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight >= self.config.half_open_max_requests.max(1) {
                    return Err(self.rejected());
                }
                inner.half_open_in_flight += 1;
                Ok(self.permit(true, inner.generation))
            }
            CircuitState::Open => Err(self.rejected()),
        }
    }

    /// Force the breaker back to closed with no recorded failures
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.transition(CircuitState::Closed);
        inner.consecutive_failures = 0;
        inner.next_attempt_at = None;
    }

    fn rejected(&self) -> RequestError {
        RequestError::CircuitOpen {
            endpoint: self.endpoint.to_string(),
        }
    }

    fn permit(&self, half_open: bool, generation: u64) -> BreakerPermit {
        BreakerPermit {
            breaker: self.clone(),
            half_open,
            generation,
            settled: false,
        }
    }

    fn on_success(&self, half_open_trial: bool, generation: u64) {
        let mut inner = self.inner.lock();

        if half_open_trial && inner.generation == generation {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            inner.half_open_successes += 1;

            tracing::debug!(
                endpoint = %self.endpoint,
                successes = inner.half_open_successes,
                threshold = self.config.success_threshold,
                "Circuit breaker success in half-open state"
            );

            if inner.half_open_successes >= self.config.success_threshold.max(1) {
                tracing::info!(
                    endpoint = %self.endpoint,
                    "Circuit breaker closing after successful recovery"
                );
                inner.transition(CircuitState::Closed);
                inner.consecutive_failures = 0;
                inner.next_attempt_at = None;
            }
            return;
        }

        if inner.state == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
        // A late success from before the circuit opened says nothing about
        // the backend now
    }

    fn on_failure(&self, half_open_trial: bool, generation: u64) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if half_open_trial && inner.generation == generation {
            tracing::warn!(
                endpoint = %self.endpoint,
                "Circuit breaker reopening due to failure in half-open state"
            );
            inner.last_failure_at = Some(now);
            self.open(&mut inner, now);
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                inner.last_failure_at = Some(now);

                tracing::warn!(
                    endpoint = %self.endpoint,
                    failures = inner.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker failure in closed state"
                );

                if inner.consecutive_failures >= self.config.failure_threshold.max(1) {
                    tracing::error!(
                        endpoint = %self.endpoint,
                        reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                        "Circuit breaker opening due to consecutive failures"
                    );
                    self.open(&mut inner, now);
                }
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                inner.last_failure_at = Some(now);
            }
        }
    }

    fn open(&self, inner: &mut BreakerInner, now: Instant) {
        inner.transition(CircuitState::Open);
        inner.next_attempt_at = Some(now + self.config.reset_timeout);
    }

    fn release(&self, half_open_trial: bool, generation: u64) {
        if !half_open_trial {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }
}

/// Admission ticket for one request.
///
/// Record the outcome with [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure). Dropping it unrecorded (for
/// example on cancellation) leaves the counters untouched.
#[derive(Debug)]
#[must_use = "record the request outcome through the permit"]
pub struct BreakerPermit {
    breaker: CircuitBreaker,
    half_open: bool,
    generation: u64,
    settled: bool,
}

impl BreakerPermit {
    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.half_open, self.generation);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.half_open, self.generation);
    }

    /// Whether this permit is a half-open trial
    pub fn is_trial(&self) -> bool {
        self.half_open
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.half_open, self.generation);
        }
    }
}

/// Breakers keyed by endpoint, created on first use.
///
/// Backed by a bounded moka cache; the least recently used breakers are
/// evicted once `max_endpoints` is exceeded and start fresh (closed) if the
/// endpoint comes back.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    breakers: Cache<String, CircuitBreaker>,
    config: CircuitBreakerConfig,
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("config", &self.config)
            .field("endpoints", &self.breakers.entry_count())
            .finish()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default(), DEFAULT_MAX_TRACKED_ENDPOINTS)
    }
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, max_endpoints: u64) -> Self {
        Self {
            breakers: Cache::builder().max_capacity(max_endpoints.max(1)).build(),
            config,
        }
    }

    /// Breaker for `endpoint`, creating a closed one on first use
    pub fn breaker(&self, endpoint: &str) -> CircuitBreaker {
        self.breakers.get_with(endpoint.to_string(), || {
            CircuitBreaker::new(endpoint, self.config.clone())
        })
    }

    /// Snapshot of an endpoint's breaker, if one is being tracked
    pub fn state(&self, endpoint: &str) -> Option<CircuitBreakerState> {
        self.breakers.get(endpoint).map(|breaker| breaker.snapshot())
    }

    /// Forget an endpoint's breaker; its next request starts closed
    pub fn reset(&self, endpoint: &str) {
        self.breakers.invalidate(endpoint);
    }

    pub fn reset_all(&self) {
        self.breakers.invalidate_all();
    }

    /// Number of endpoints currently tracked
    pub fn len(&self) -> u64 {
        self.breakers.run_pending_tasks();
        self.breakers.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}
