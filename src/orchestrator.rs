//! Request orchestrator: the single entry point for every call
//!
//! Per request:
//! 1. Resolve and validate the URL, compute the fingerprint
//! 2. Cache-eligible reads are answered from the response cache when fresh
//! 3. Register the caller's cancellation token under the request id
//! 4. Join an identical in-flight call, or start one on its own task
//! 5. The call asks the endpoint's circuit breaker for a permit, runs the
//!    retry executor, reports the outcome to the breaker and stores 2xx
//!    cacheable responses
//!
//! Breaker bookkeeping counts one outcome per call, not per retry attempt.
//! Responses with a non-retryable status (4xx) count as the backend being
//! healthy; cancelled calls are not counted at all.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ResponseCache;
use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::circuit_breaker::{BreakerPermit, CircuitBreakerRegistry, CircuitBreakerState};
use crate::config::{Config, ConfigError};
use crate::error::RequestError;
use crate::metrics::CoreMetrics;
use crate::request::{
    endpoint_key, resolve_url, RequestDescriptor, RequestFingerprint, RequestId, Response,
};
use crate::request_coalescing::RequestCoalescer;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::transport::{Transport, TransportRequest};

/// Cheaply cloneable handle; clones share every component
#[derive(Clone)]
pub struct RequestOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RequestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOrchestrator")
            .field("base_url", &self.inner.base_url)
            .field("in_flight", &self.inner.cancellations.len())
            .finish_non_exhaustive()
    }
}

struct Inner {
    base_url: String,
    default_timeout: Duration,
    default_retry: RetryPolicy,
    cache_enabled: bool,
    cache: ResponseCache,
    breakers: CircuitBreakerRegistry,
    executor: RetryExecutor,
    coalescer: Option<RequestCoalescer>,
    cancellations: CancellationRegistry,
    metrics: Arc<CoreMetrics>,
}

/// Everything one network call needs, owned so it can move to a spawned task
struct Call {
    request: TransportRequest,
    policy: RetryPolicy,
    timeout: Duration,
    endpoint: String,
    fingerprint: RequestFingerprint,
    cacheable: bool,
}

impl RequestOrchestrator {
    /// Build an orchestrator from validated configuration
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        let metrics = Arc::new(CoreMetrics::new()?);
        Self::with_metrics(config, transport, metrics)
    }

    /// Build an orchestrator that records into an existing metrics instance
    pub fn with_metrics(
        config: &Config,
        transport: Arc<dyn Transport>,
        metrics: Arc<CoreMetrics>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let breakers = CircuitBreakerRegistry::new(
            config.circuit_breaker.to_circuit_breaker_config(),
            config.circuit_breaker.max_endpoints,
        );
        let coalescer = config.coalescing.enabled.then(RequestCoalescer::new);

        tracing::info!(
            base_url = %config.api.base_url,
            cache_enabled = config.cache.enabled,
            cache_ttl_seconds = config.cache.ttl_seconds,
            coalescing = config.coalescing.enabled,
            max_attempts = config.retry.max_attempts,
            "Request orchestrator initialized"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                base_url: config.api.base_url.clone(),
                default_timeout: config.api.timeout(),
                default_retry: config.retry.to_retry_policy(),
                cache_enabled: config.cache.enabled,
                cache: ResponseCache::new(config.cache.ttl(), config.cache.max_entries),
                breakers,
                executor: RetryExecutor::new(transport, metrics.clone()),
                coalescer,
                cancellations: CancellationRegistry::new(),
                metrics,
            }),
        })
    }

    /// Execute one request through cache, deduplication, circuit breaker and
    /// retry.
    ///
    /// Returns the 2xx response or one of the `RequestError` kinds.
    pub async fn execute(&self, descriptor: RequestDescriptor) -> Result<Response, RequestError> {
        let result = self.inner.run(&descriptor).await;
        let outcome = match &result {
            Ok((_, true)) => "cache_hit",
            Ok((_, false)) => "success",
            Err(e) => e.kind(),
        };
        self.inner.metrics.record_request(outcome);
        result.map(|(response, _)| response)
    }

    /// Execute and decode the 2xx body as JSON
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<T, RequestError> {
        self.execute(descriptor).await?.json()
    }

    /// Cancel the in-flight request with `id`.
    ///
    /// Returns false if no such request is running; never an error.
    pub fn cancel(&self, id: &RequestId) -> bool {
        self.inner.cancellations.cancel(id)
    }

    /// Cancel every in-flight request. Safe to call repeatedly.
    pub fn cancel_all(&self) -> usize {
        let cancelled = self.inner.cancellations.cancel_all();
        if let Some(coalescer) = &self.inner.coalescer {
            coalescer.cancel_all();
        }
        cancelled
    }

    /// Cancel everything and drop all cached responses
    pub fn shutdown(&self) {
        let cancelled = self.cancel_all();
        self.inner.cache.clear();
        tracing::info!(cancelled = cancelled, "Request orchestrator shut down");
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    /// Breaker snapshot for the endpoint `url` (absolute or relative) maps to
    pub fn breaker_state(&self, url: &str) -> Option<CircuitBreakerState> {
        let resolved = resolve_url(&self.inner.base_url, url).ok()?;
        self.inner.breakers.state(&endpoint_key(&resolved))
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.inner.breakers
    }

    /// Number of calls currently tracked for cancellation
    pub fn in_flight_count(&self) -> usize {
        self.inner.cancellations.len()
    }

    /// Number of distinct network calls currently shared between identical
    /// requests (0 when deduplication is disabled)
    pub fn shared_in_flight_count(&self) -> usize {
        self.inner
            .coalescer
            .as_ref()
            .map_or(0, RequestCoalescer::in_flight_count)
    }

    pub fn metrics(&self) -> &Arc<CoreMetrics> {
        &self.inner.metrics
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }
}

impl Inner {
    /// Returns the response and whether it came from the cache
    async fn run(
        self: &Arc<Self>,
        descriptor: &RequestDescriptor,
    ) -> Result<(Response, bool), RequestError> {
        let url = resolve_url(&self.base_url, descriptor.url())?;
        let fingerprint = RequestFingerprint::compute(
            descriptor.method(),
            &url,
            descriptor.body().map(|body| body.as_ref()),
        );
        let cacheable = self.cache_enabled && descriptor.is_cacheable();

        if cacheable {
            let cached = self.cache.get(&fingerprint);
            self.metrics.record_cache_lookup(cached.is_some());
            if let Some(response) = cached {
                tracing::debug!(
                    request_id = %descriptor.id(),
                    fingerprint = %fingerprint,
                    "Serving response from cache"
                );
                return Ok((response, true));
            }
        }

        let token = descriptor.cancel_token().cloned().unwrap_or_default();
        let _registration = self.cancellations.register(descriptor.id(), token.clone());
        if token.is_cancelled() {
            return Err(RequestError::Cancelled);
        }

        tracing::debug!(
            request_id = %descriptor.id(),
            method = %descriptor.method(),
            url = %url,
            fingerprint = %fingerprint,
            "Executing request"
        );

        let call = Call {
            endpoint: endpoint_key(&url),
            request: TransportRequest {
                method: descriptor.method().clone(),
                url,
                headers: descriptor.headers().clone(),
                body: descriptor.body().cloned(),
            },
            policy: descriptor
                .retry()
                .cloned()
                .unwrap_or_else(|| self.default_retry.clone()),
            timeout: descriptor.timeout().unwrap_or(self.default_timeout),
            fingerprint,
            cacheable,
        };

        let Some(coalescer) = &self.coalescer else {
            return self.call(&call, &token).await.map(|r| (r, false));
        };

        let acquired = coalescer.acquire(&call.fingerprint);
        match acquired.work {
            Some(work) => {
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    let outcome = inner.call(&call, work.token()).await;
                    work.complete(outcome);
                });
            }
            None => {
                self.metrics.record_dedup_join();
                tracing::debug!(
                    request_id = %descriptor.id(),
                    fingerprint = %call.fingerprint,
                    "Joined identical in-flight request"
                );
            }
        }

        acquired
            .subscription
            .wait(&token)
            .await
            .map(|response| (response, false))
    }

    async fn call(&self, call: &Call, token: &CancellationToken) -> Result<Response, RequestError> {
        let permit = match self.breakers.breaker(&call.endpoint).try_acquire() {
            Ok(permit) => permit,
            Err(e) => {
                self.metrics.record_circuit_rejection();
                tracing::debug!(endpoint = %call.endpoint, "Rejected by open circuit");
                return Err(e);
            }
        };

        let result = self
            .executor
            .execute(&call.request, &call.policy, call.timeout, token)
            .await;

        report_to_breaker(permit, &result);

        if let Ok(response) = &result {
            if call.cacheable {
                self.cache.set(call.fingerprint.clone(), response.clone());
            }
        }
        result
    }
}

fn report_to_breaker(permit: BreakerPermit, result: &Result<Response, RequestError>) {
    match result {
        Ok(_) => permit.record_success(),
        Err(e) if e.is_transient() => permit.record_failure(),
        // The backend answered; the request itself was wrong
        Err(RequestError::HttpError { .. }) => permit.record_success(),
        Err(_) => drop(permit),
    }
}
