// Metrics module - Prometheus metrics for the request core
//
// Tracks:
// - Requests by outcome (success, cache hit, error kind)
// - Retry attempts
// - Cache hits and misses
// - Deduplicated joins onto an in-flight request
// - Circuit-open rejections
// - Offline queue results and pending depth

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Metric families recorded by the orchestrator and the offline queue.
///
/// Each instance owns its own `Registry` so several orchestrators (and tests)
/// can coexist in one process without colliding on metric names.
#[derive(Clone)]
pub struct CoreMetrics {
    registry: Registry,
    requests: IntCounterVec,
    retries: IntCounter,
    cache_lookups: IntCounterVec,
    dedup_joins: IntCounter,
    circuit_rejections: IntCounter,
    queue_operations: IntCounterVec,
    queue_pending: IntGauge,
}

impl std::fmt::Debug for CoreMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreMetrics").finish_non_exhaustive()
    }
}

impl CoreMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new(
                "kawaraban_requests_total",
                "Total number of requests by outcome",
            ),
            &["outcome"], // success, cache_hit, or an error kind
        )?;
        let retries = IntCounter::new(
            "kawaraban_retry_attempts_total",
            "Total number of retry attempts after a retryable failure",
        )?;
        let cache_lookups = IntCounterVec::new(
            Opts::new(
                "kawaraban_cache_lookups_total",
                "Total number of response cache lookups by result",
            ),
            &["result"], // hit, miss
        )?;
        let dedup_joins = IntCounter::new(
            "kawaraban_dedup_joins_total",
            "Total number of requests that joined an identical in-flight request",
        )?;
        let circuit_rejections = IntCounter::new(
            "kawaraban_circuit_open_rejections_total",
            "Total number of requests rejected by an open circuit breaker",
        )?;
        let queue_operations = IntCounterVec::new(
            Opts::new(
                "kawaraban_queue_operations_total",
                "Total number of offline queue executions by result",
            ),
            &["result"], // succeeded, requeued, failed
        )?;
        let queue_pending = IntGauge::new(
            "kawaraban_queue_pending",
            "Current number of pending offline operations",
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(retries.clone()))?;
        registry.register(Box::new(cache_lookups.clone()))?;
        registry.register(Box::new(dedup_joins.clone()))?;
        registry.register(Box::new(circuit_rejections.clone()))?;
        registry.register(Box::new(queue_operations.clone()))?;
        registry.register(Box::new(queue_pending.clone()))?;

        Ok(Self {
            registry,
            requests,
            retries,
            cache_lookups,
            dedup_joins,
            circuit_rejections,
            queue_operations,
            queue_pending,
        })
    }

    pub fn record_request(&self, outcome: &str) {
        self.requests.with_label_values(&[outcome]).inc();
    }

    pub fn record_retry(&self) {
        self.retries.inc();
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups.with_label_values(&[result]).inc();
    }

    pub fn record_dedup_join(&self) {
        self.dedup_joins.inc();
    }

    pub fn record_circuit_rejection(&self) {
        self.circuit_rejections.inc();
    }

    pub fn record_queue_result(&self, result: &str) {
        self.queue_operations.with_label_values(&[result]).inc();
    }

    pub fn set_queue_pending(&self, pending: usize) {
        self.queue_pending.set(pending as i64);
    }

    pub fn requests(&self, outcome: &str) -> u64 {
        self.requests.with_label_values(&[outcome]).get()
    }

    pub fn retries(&self) -> u64 {
        self.retries.get()
    }

    pub fn dedup_joins(&self) -> u64 {
        self.dedup_joins.get()
    }

    pub fn circuit_rejections(&self) -> u64 {
        self.circuit_rejections.get()
    }

    pub fn queue_results(&self, result: &str) -> u64 {
        self.queue_operations.with_label_values(&[result]).get()
    }

    pub fn queue_pending(&self) -> i64 {
        self.queue_pending.get()
    }

    /// Render every metric in Prometheus text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
