// Orchestrator integration tests
//
// Drive the full request path (cache, deduplication, circuit breaker, retry,
// cancellation) through the public API against a scripted transport.

use std::sync::Arc;
use std::time::Duration;

use kawaraban::cancel::CancellationToken;
use kawaraban::circuit_breaker::CircuitState;
use kawaraban::config::Config;
use kawaraban::request::{CacheMode, RequestId, Response};
use kawaraban::retry::{BackoffKind, RetryPolicy};
use kawaraban::transport::{Scripted, ScriptedTransport};
use kawaraban::{RequestDescriptor, RequestError, RequestOrchestrator};

fn config() -> Config {
    let mut config = Config::default();
    config.api.base_url = "http://feeds.test/api".into();
    config
}

fn orchestrator(config: &Config, transport: &ScriptedTransport) -> RequestOrchestrator {
    RequestOrchestrator::new(config, Arc::new(transport.clone())).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_identical_requests_share_one_network_call() {
    // Test: three callers ask for the same feed list while the first call is
    // still in flight; the transport must see exactly one request
    let transport = ScriptedTransport::new();
    transport.set_delay(Duration::from_millis(200));
    transport.push_response("/api/feeds", Response::new(200, r#"[{"id":1}]"#));
    let orchestrator = orchestrator(&config(), &transport);

    let results = futures::future::join_all(
        (0..3).map(|_| orchestrator.execute(RequestDescriptor::get("/feeds"))),
    )
    .await;

    assert_eq!(transport.call_count(), 1);
    for result in results {
        assert_eq!(result.unwrap().body, r#"[{"id":1}]"#);
    }
    assert_eq!(orchestrator.metrics().dedup_joins(), 2);
    assert_eq!(orchestrator.shared_in_flight_count(), 0);
    assert_eq!(orchestrator.in_flight_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_identical_requests_share_one_failure() {
    // Test: one failed network call is reported identically to all three
    // callers, and nothing stays registered afterwards
    let transport = ScriptedTransport::new();
    transport.set_delay(Duration::from_millis(200));
    transport.push_error(
        "/api/feeds",
        RequestError::NetworkFailure("connection reset".into()),
    );
    let orchestrator = orchestrator(&config(), &transport);

    let results = futures::future::join_all((0..3).map(|_| {
        orchestrator.execute(
            RequestDescriptor::get("/feeds").with_retry(RetryPolicy::single_attempt()),
        )
    }))
    .await;

    assert_eq!(transport.call_count(), 1);
    let expected = Err(RequestError::NetworkFailure("connection reset".into()));
    for result in &results {
        assert_eq!(result, &expected);
    }
    assert_eq!(orchestrator.metrics().dedup_joins(), 2);
    assert_eq!(orchestrator.shared_in_flight_count(), 0);
    assert_eq!(orchestrator.in_flight_count(), 0);
    assert!(orchestrator.cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelling_one_subscriber_keeps_shared_call_alive() {
    // Test: two identical requests share a call; cancelling the first must
    // not abort the second
    let transport = ScriptedTransport::new();
    transport.set_delay(Duration::from_secs(1));
    transport.push_response("/api/feeds", Response::new(200, "[]"));
    let orchestrator = orchestrator(&config(), &transport);

    let first_id = RequestId::new();
    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .execute(RequestDescriptor::get("/feeds").with_id(first_id))
                .await
        })
    };
    let second = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.execute(RequestDescriptor::get("/feeds")).await })
    };
    tokio::task::yield_now().await;

    assert!(orchestrator.cancel(&first_id));
    assert_eq!(first.await.unwrap(), Err(RequestError::Cancelled));
    assert_eq!(second.await.unwrap().unwrap().body, "[]");
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn test_second_read_is_served_from_cache() {
    let transport = ScriptedTransport::new();
    transport.push_response("/api/feeds", Response::new(200, "[1]"));
    transport.push_response("/api/feeds", Response::new(200, "[1,2]"));
    let orchestrator = orchestrator(&config(), &transport);

    let first = orchestrator.execute(RequestDescriptor::get("/feeds")).await.unwrap();
    let second = orchestrator.execute(RequestDescriptor::get("/feeds")).await.unwrap();
    assert_eq!(first.body, "[1]");
    assert_eq!(second.body, "[1]");
    assert_eq!(transport.call_count(), 1);
    assert_eq!(orchestrator.metrics().requests("cache_hit"), 1);

    // Bypass always goes to the network
    let fresh = orchestrator
        .execute(RequestDescriptor::get("/feeds").with_cache_mode(CacheMode::Bypass))
        .await
        .unwrap();
    assert_eq!(fresh.body, "[1,2]");
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn test_writes_are_never_cached() {
    let transport = ScriptedTransport::new();
    let orchestrator = orchestrator(&config(), &transport);

    for _ in 0..2 {
        orchestrator
            .execute(RequestDescriptor::post("/articles/7/read"))
            .await
            .unwrap();
    }
    assert_eq!(transport.call_count(), 2);
    assert!(orchestrator.cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_then_recovers_through_half_open() {
    // Test: 3 consecutive failures open the circuit, the 4th call is rejected
    // without touching the network, and a trial after the reset timeout
    // closes it again
    let mut config = config();
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.reset_timeout_seconds = 30;
    config.retry.max_attempts = 1;
    config.cache.enabled = false;

    let transport = ScriptedTransport::new();
    transport.set_fallback(Scripted::Respond(Response::new(503, "unavailable")));
    let orchestrator = orchestrator(&config, &transport);

    for _ in 0..3 {
        let err = orchestrator
            .execute(RequestDescriptor::get("/feeds"))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::HttpError { status: 503, .. }));
    }
    let state = orchestrator.breaker_state("/feeds").unwrap();
    assert_eq!(state.state, CircuitState::Open);
    assert_eq!(state.consecutive_failures, 3);

    let rejected = orchestrator
        .execute(RequestDescriptor::get("/feeds"))
        .await
        .unwrap_err();
    assert!(matches!(rejected, RequestError::CircuitOpen { .. }));
    assert_eq!(transport.call_count(), 3);
    assert_eq!(orchestrator.metrics().circuit_rejections(), 1);

    tokio::time::advance(Duration::from_secs(30)).await;
    transport.set_fallback(Scripted::Respond(Response::new(200, "[]")));

    orchestrator
        .execute(RequestDescriptor::get("/feeds"))
        .await
        .unwrap();
    assert_eq!(
        orchestrator.breaker_state("/feeds").unwrap().state,
        CircuitState::Closed
    );
    assert_eq!(transport.call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_retry_backoff_doubles_between_attempts() {
    let mut config = config();
    config.retry.max_attempts = 3;
    config.retry.backoff = BackoffKind::Exponential;
    config.retry.initial_delay_ms = 1000;

    let transport = ScriptedTransport::new();
    transport.push_response("/api/feeds", Response::new(503, ""));
    transport.push_response("/api/feeds", Response::new(502, ""));
    transport.push_response("/api/feeds", Response::new(200, "[]"));
    let orchestrator = orchestrator(&config, &transport);

    orchestrator
        .execute(RequestDescriptor::get("/feeds"))
        .await
        .unwrap();

    let calls = transport.calls_to("/api/feeds");
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1].at - calls[0].at, Duration::from_millis(1000));
    assert_eq!(calls[2].at - calls[1].at, Duration::from_millis(2000));
    assert_eq!(orchestrator.metrics().retries(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_report_attempt_count() {
    let mut config = config();
    config.retry.max_attempts = 2;
    config.retry.initial_delay_ms = 10;

    let transport = ScriptedTransport::new();
    transport.set_fallback(Scripted::Fail(RequestError::NetworkFailure(
        "connection reset".into(),
    )));
    let orchestrator = orchestrator(&config, &transport);

    let err = orchestrator
        .execute(RequestDescriptor::get("/feeds"))
        .await
        .unwrap_err();
    assert_eq!(err.attempts(), 2);
    assert!(err.is_connectivity());
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_all_is_idempotent() {
    let transport = ScriptedTransport::new();
    transport.set_delay(Duration::from_secs(5));
    let orchestrator = orchestrator(&config(), &transport);

    let handles: Vec<_> = ["/feeds", "/articles", "/folders"]
        .into_iter()
        .map(|path| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.execute(RequestDescriptor::get(path)).await })
        })
        .collect();
    tokio::task::yield_now().await;
    assert_eq!(orchestrator.in_flight_count(), 3);

    assert_eq!(orchestrator.cancel_all(), 3);
    assert_eq!(orchestrator.cancel_all(), 0);

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Err(RequestError::Cancelled));
    }
    assert_eq!(orchestrator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_cancelling_completed_request_is_a_no_op() {
    let transport = ScriptedTransport::new();
    let orchestrator = orchestrator(&config(), &transport);
    let id = RequestId::new();

    orchestrator
        .execute(RequestDescriptor::get("/feeds").with_id(id))
        .await
        .unwrap();
    assert!(!orchestrator.cancel(&id));
    assert!(!orchestrator.cancel(&RequestId::new()));
}

#[tokio::test]
async fn test_pre_cancelled_token_never_reaches_network() {
    let transport = ScriptedTransport::new();
    let orchestrator = orchestrator(&config(), &transport);
    let token = CancellationToken::new();
    token.cancel();

    let result = orchestrator
        .execute(RequestDescriptor::post("/articles/1/star").with_cancel_token(token))
        .await;
    assert_eq!(result, Err(RequestError::Cancelled));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_execute_json_decodes_body() {
    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Feed {
        id: u32,
        title: String,
    }

    let transport = ScriptedTransport::new();
    transport.push_response(
        "/api/feeds/1",
        Response::new(200, r#"{"id":1,"title":"Rust Blog"}"#),
    );
    transport.push_response("/api/feeds/2", Response::new(200, "not json"));
    let orchestrator = orchestrator(&config(), &transport);

    let feed: Feed = orchestrator
        .execute_json(RequestDescriptor::get("/feeds/1"))
        .await
        .unwrap();
    assert_eq!(feed.title, "Rust Blog");

    let err = orchestrator
        .execute_json::<Feed>(RequestDescriptor::get("/feeds/2"))
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::ParseFailure(_)));
}

#[tokio::test]
async fn test_metrics_render_includes_request_outcomes() {
    let transport = ScriptedTransport::new();
    transport.push_response("/api/missing", Response::new(404, "gone"));
    let orchestrator = orchestrator(&config(), &transport);

    let _ = orchestrator.execute(RequestDescriptor::get("/missing")).await;
    let rendered = orchestrator.metrics().render();
    assert!(rendered.contains("kawaraban_requests_total"));
    assert!(rendered.contains("http_error"));
}
