// Offline queue integration tests
//
// Queue + orchestrator + store wired together the way the application wires
// them: operations queued while offline, replayed when connectivity returns,
// and persisted across restarts.

use chrono::{TimeZone, Utc};
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use kawaraban::config::{Config, QueueConfig};
use kawaraban::connectivity::ConnectivityMonitor;
use kawaraban::queue::{OfflineQueue, PersistedQueue, Priority, RestoreOutcome, SyncOperation};
use kawaraban::request::Response;
use kawaraban::store::{FileStore, KeyValueStore, MemoryStore};
use kawaraban::transport::{Scripted, ScriptedTransport};
use kawaraban::{RequestError, RequestOrchestrator};

fn orchestrator(transport: &ScriptedTransport) -> RequestOrchestrator {
    let mut config = Config::default();
    config.api.base_url = "http://feeds.test".into();
    RequestOrchestrator::new(&config, Arc::new(transport.clone())).unwrap()
}

fn queue_config(max_retries: u32) -> QueueConfig {
    QueueConfig {
        max_retries,
        ..Default::default()
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_reconnect_drains_high_priority_first() {
    // Test: a low-priority operation queued at t=0 and a high-priority one
    // queued at t=1 while offline; on reconnect the high one goes first
    let transport = ScriptedTransport::new();
    let store = MemoryStore::new();
    let queue = OfflineQueue::restore(
        &queue_config(3),
        Arc::new(store.clone()),
        orchestrator(&transport),
    )
    .await;

    let monitor = ConnectivityMonitor::new(false);
    let listener = queue.spawn_reconnect_listener(monitor.clone());

    let low = SyncOperation::new("mark_read", Method::POST, "/articles/1/read")
        .with_priority(Priority::Low)
        .with_enqueued_at(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    let high = SyncOperation::new("subscribe", Method::POST, "/subscriptions")
        .with_priority(Priority::High)
        .with_enqueued_at(Utc.timestamp_opt(1_700_000_001, 0).unwrap())
        .with_payload(serde_json::json!({"url": "https://blog.rust-lang.org/feed.xml"}));

    assert!(queue.add_to_queue(low).await.is_persisted());
    assert!(queue.add_to_queue(high).await.is_persisted());
    assert_eq!(transport.call_count(), 0);

    assert!(monitor.set_online(true));
    wait_for(|| queue.status().succeeded == 2).await;

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].request.url.ends_with("/subscriptions"));
    assert!(calls[1].request.url.ends_with("/articles/1/read"));
    assert_eq!(
        calls[0].request.body.as_deref(),
        Some(br#"{"url":"https://blog.rust-lang.org/feed.xml"}"#.as_slice())
    );

    let stored = PersistedQueue::decode(&store.raw("offline_queue").unwrap()).unwrap();
    assert!(stored.pending.is_empty());

    drop(queue);
    drop(monitor);
    tokio::time::timeout(Duration::from_secs(1), listener)
        .await
        .expect("listener stops once the monitor is gone")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_bounded_retry_then_failed() {
    // Test: max_retries = 1 allows two attempts in total; a single reconnect
    // keeps draining until the operation lands in the failed bucket
    let transport = ScriptedTransport::new();
    transport.set_fallback(Scripted::Respond(Response::new(503, "maintenance")));
    let queue = OfflineQueue::restore(
        &queue_config(1),
        Arc::new(MemoryStore::new()),
        orchestrator(&transport),
    )
    .await;
    let monitor = ConnectivityMonitor::new(false);
    let _listener = queue.spawn_reconnect_listener(monitor.clone());
    queue
        .add_to_queue(SyncOperation::new("star", Method::PUT, "/articles/9/star"))
        .await;

    assert!(monitor.set_online(true));
    wait_for(|| queue.status().failed == 1).await;
    wait_for(|| !queue.is_processing()).await;

    assert_eq!(transport.call_count(), 2);
    let calls = transport.calls();
    assert_eq!(calls[1].at - calls[0].at, Duration::from_millis(1000));

    let failed = queue.failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attempt_count, 2);
    assert_eq!(failed[0].last_error.as_deref(), Some("HTTP 503"));
    assert_eq!(queue.status().pending, 0);

    // Nothing left to retry, so a manual sync is a no-op
    let report = queue.force_sync().await;
    assert_eq!(report.attempted, 0);
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_network_failure_is_retried_in_the_same_sync() {
    let transport = ScriptedTransport::new();
    transport.push_error(
        "/articles/1/read",
        RequestError::NetworkFailure("offline".into()),
    );
    let queue = OfflineQueue::restore(
        &queue_config(3),
        Arc::new(MemoryStore::new()),
        orchestrator(&transport),
    )
    .await;
    queue
        .add_to_queue(SyncOperation::new("mark_read", Method::POST, "/articles/1/read"))
        .await;

    let report = queue.force_sync().await;
    assert_eq!(report.requeued, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(queue.status().pending, 0);

    let succeeded = queue.succeeded();
    assert_eq!(succeeded[0].attempt_count, 1);
    assert_eq!(succeeded[0].last_error, None);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_leaves_nothing_pending_after_transient_failures() {
    // Test: a mix of operations that recover after one and two failures is
    // fully drained by one reconnect, with the configured backoff in between
    let transport = ScriptedTransport::new();
    transport.push_response("/folders", Response::new(502, ""));
    transport.push_response("/folders", Response::new(502, ""));
    transport.push_error(
        "/articles/2/read",
        RequestError::NetworkFailure("reset".into()),
    );
    let config = QueueConfig {
        retry_delay_ms: 250,
        ..queue_config(3)
    };
    let queue = OfflineQueue::restore(
        &config,
        Arc::new(MemoryStore::new()),
        orchestrator(&transport),
    )
    .await;
    let monitor = ConnectivityMonitor::new(false);
    let _listener = queue.spawn_reconnect_listener(monitor.clone());

    queue
        .add_to_queue(SyncOperation::new("create_folder", Method::POST, "/folders"))
        .await;
    queue
        .add_to_queue(SyncOperation::new("mark_read", Method::POST, "/articles/2/read"))
        .await;

    assert!(monitor.set_online(true));
    wait_for(|| queue.status().succeeded == 2).await;

    assert_eq!(queue.status().pending, 0);
    assert_eq!(queue.status().failed, 0);
    let folders = transport.calls_to("/folders");
    assert_eq!(folders.len(), 3);
    assert_eq!(folders[1].at - folders[0].at, Duration::from_millis(250));
    assert_eq!(folders[2].at - folders[1].at, Duration::from_millis(500));
}

#[tokio::test]
async fn test_corrupted_document_starts_empty_and_is_overwritten() {
    let transport = ScriptedTransport::new();
    let store = MemoryStore::new();
    store.insert_raw("offline_queue", "{\"version\": 1, \"pending\": [tru");

    let queue = OfflineQueue::restore(
        &queue_config(3),
        Arc::new(store.clone()),
        orchestrator(&transport),
    )
    .await;
    assert!(matches!(
        queue.restore_outcome(),
        RestoreOutcome::Discarded { .. }
    ));
    assert_eq!(queue.status().total, 0);

    queue
        .add_to_queue(SyncOperation::new("mark_read", Method::POST, "/articles/1/read"))
        .await;
    let stored = PersistedQueue::decode(&store.raw("offline_queue").unwrap()).unwrap();
    assert_eq!(stored.pending.len(), 1);
}

#[tokio::test]
async fn test_unknown_format_version_is_discarded() {
    let transport = ScriptedTransport::new();
    let store = MemoryStore::new();
    store.insert_raw("offline_queue", r#"{"version": 99, "pending": []}"#);

    let queue = OfflineQueue::restore(
        &queue_config(3),
        Arc::new(store),
        orchestrator(&transport),
    )
    .await;
    assert!(matches!(
        queue.restore_outcome(),
        RestoreOutcome::Discarded { .. }
    ));
}

#[tokio::test]
async fn test_queue_survives_restart_with_file_store() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    transport.push_response("/folders", Response::new(400, "duplicate name"));

    {
        let queue = OfflineQueue::restore(
            &queue_config(3),
            Arc::new(FileStore::new(dir.path())),
            orchestrator(&transport),
        )
        .await;
        queue
            .add_to_queue(
                SyncOperation::new("create_folder", Method::POST, "/folders")
                    .with_priority(Priority::High)
                    .with_payload(serde_json::json!({"name": "Rust"})),
            )
            .await;
        queue
            .add_to_queue(SyncOperation::new("mark_read", Method::POST, "/articles/3/read"))
            .await;
        queue
            .add_to_queue(SyncOperation::new("unstar", Method::DELETE, "/articles/4/star"))
            .await;

        let report = queue.force_sync().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 2);
        queue
            .add_to_queue(SyncOperation::new("mark_read", Method::POST, "/articles/5/read"))
            .await;
    }

    let restored = OfflineQueue::restore(
        &queue_config(3),
        Arc::new(FileStore::new(dir.path())),
        orchestrator(&transport),
    )
    .await;
    assert_eq!(
        restored.restore_outcome(),
        &RestoreOutcome::Restored {
            pending: 1,
            failed: 1
        }
    );
    assert_eq!(restored.pending()[0].path, "/articles/5/read");

    let failed = restored.failed();
    assert_eq!(failed[0].operation_type, "create_folder");
    assert_eq!(
        failed[0].payload,
        Some(serde_json::json!({"name": "Rust"}))
    );
    assert_eq!(restored.status().succeeded, 0, "succeeded ops are not persisted");
}

#[tokio::test]
async fn test_store_outage_does_not_lose_operations() {
    let transport = ScriptedTransport::new();
    let store = MemoryStore::new();
    let queue = OfflineQueue::restore(
        &queue_config(3),
        Arc::new(store.clone()),
        orchestrator(&transport),
    )
    .await;

    store.set_unavailable(true);
    let outcome = queue
        .add_to_queue(SyncOperation::new("mark_read", Method::POST, "/articles/1/read"))
        .await;
    assert!(!outcome.is_persisted());

    let report = queue.force_sync().await;
    assert_eq!(report.succeeded, 1);

    store.set_unavailable(false);
    assert!(store.get("offline_queue").await.unwrap().is_none());
}

#[tokio::test]
async fn test_queue_metrics_follow_drain_results() {
    let transport = ScriptedTransport::new();
    transport.push_response("/bad", Response::new(422, ""));
    let orchestrator = orchestrator(&transport);
    let queue = OfflineQueue::restore(
        &queue_config(3),
        Arc::new(MemoryStore::new()),
        orchestrator.clone(),
    )
    .await;

    queue
        .add_to_queue(SyncOperation::new("a", Method::POST, "/good"))
        .await;
    queue
        .add_to_queue(SyncOperation::new("b", Method::POST, "/bad"))
        .await;
    assert_eq!(orchestrator.metrics().queue_pending(), 2);

    queue.force_sync().await;
    let metrics = orchestrator.metrics();
    assert_eq!(metrics.queue_results("succeeded"), 1);
    assert_eq!(metrics.queue_results("failed"), 1);
    assert_eq!(metrics.queue_pending(), 0);
}
