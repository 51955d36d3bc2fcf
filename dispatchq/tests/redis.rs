//! Redis backend tests
//!
//! End-to-end dispatch over a real Redis server. Each test uses its own key
//! prefix so runs do not interfere.

mod common;

use common::{caller, images_service, EventRecorder};
use dispatchq::broker::LocalBroker;
use dispatchq::dispatch::{self, QueueSettings};
use dispatchq::queue::{
    JobOptions, JobState, QueueBackend, QueueEvent, RedisBackend, WorkerOptions, MAX_PRIORITY,
};
use dispatchq::storage::{Keys, RedisClient};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn backend(test_name: &str) -> Arc<RedisBackend> {
    let redis_url = std::env::var("REDIS_URL")
        .unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let prefix = format!("test-{}-{}", test_name, uuid::Uuid::new_v4());
    let client = RedisClient::from_url(redis_url)
        .await
        .expect("Failed to connect to Redis");
    Arc::new(RedisBackend::with_client(client, Keys::new(prefix)))
}

fn settings(backend: Arc<RedisBackend>) -> QueueSettings {
    QueueSettings::new()
        .backend(backend)
        .scheduler_interval(Duration::from_millis(20))
        .worker(WorkerOptions::new().poll_interval(Duration::from_millis(10)))
}

#[tokio::test]
#[ignore = "Integration test - requires Redis server"]
async fn test_redis_resize_scenario() {
    let backend = backend("resize").await;
    let broker = Arc::new(LocalBroker::new());
    let events = EventRecorder::start(&broker);
    let images = dispatch::mount(images_service(), broker.clone(), settings(backend.clone()))
        .await
        .unwrap();

    let job = images
        .local_queue(&caller(), "resize", json!({"width": 42, "height": 42}), JobOptions::new())
        .await
        .unwrap();

    let completed = events.wait_for_event("images.resize.completed").await;
    assert_eq!(completed.payload, Some(json!({"id": job.id})));
    assert_eq!(completed.opts.meta["bucket"], json!("NGNLS2"));
    events.wait_for_event("resize.completed").await;
    let progress = events.wait_for_event("images.resize.progress").await;
    assert_eq!(progress.payload, Some(json!({"id": job.id, "progress": 100})));

    let stored = images.job_in_own_queue(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Completed);
    assert_eq!(
        stored.return_value,
        Some(json!({"bucket": "NGNLS2", "size": 1764, "job": job.id}))
    );

    images.stop().await.unwrap();
    backend.close().await.unwrap();
}

#[tokio::test]
#[ignore = "Integration test - requires Redis server"]
async fn test_redis_pause_and_clean() {
    let backend = backend("pause").await;
    let mut subscription = backend.subscribe("reports").await.unwrap();

    backend.pause("reports").await.unwrap();
    assert!(backend.is_paused("reports").await.unwrap());
    let job = backend
        .add("reports", "build", json!({"params": {}}), JobOptions::new())
        .await
        .unwrap();
    assert!(backend.move_to_active("reports").await.unwrap().is_none());

    backend.resume("reports").await.unwrap();
    let active = backend.move_to_active("reports").await.unwrap().unwrap();
    assert_eq!(active.id, job.id);
    backend
        .move_to_completed("reports", &job.id, json!("done"))
        .await
        .unwrap();

    let cleaned = backend
        .clean("reports", Duration::ZERO, 0, JobState::Completed)
        .await
        .unwrap();
    assert_eq!(cleaned, vec![job.id.clone()]);
    assert!(backend.get_job("reports", &job.id).await.unwrap().is_none());

    let mut kinds = Vec::new();
    while kinds.len() < 5 {
        match tokio::time::timeout(Duration::from_secs(2), subscription.recv()).await {
            Ok(Some(event)) => kinds.push(event.kind()),
            _ => break,
        }
    }
    assert_eq!(kinds, vec!["paused", "resumed", "active", "completed", "cleaned"]);

    backend.close().await.unwrap();
}

#[tokio::test]
#[ignore = "Integration test - requires Redis server"]
async fn test_redis_custom_job_id() {
    let backend = backend("custom-id").await;

    let opts = JobOptions::new().job_id("weekly");
    let first = backend
        .add("reports", "build", json!({"params": {"n": 1}}), opts.clone())
        .await
        .unwrap();
    let second = backend
        .add("reports", "build", json!({"params": {"n": 2}}), opts)
        .await
        .unwrap();
    assert_eq!(first.id, "weekly");
    assert_eq!(second.data, first.data);
    assert_eq!(backend.counts("reports").await.unwrap().waiting, 1);

    backend.close().await.unwrap();
}

#[tokio::test]
#[ignore = "Integration test - requires Redis server"]
async fn test_redis_rejected_add_does_not_consume_an_id() {
    let backend = backend("rejected").await;

    let invalid = JobOptions::new().priority(MAX_PRIORITY + 1);
    assert!(backend
        .add("reports", "build", json!({"params": {}}), invalid)
        .await
        .is_err());
    let custom_invalid = JobOptions::new().job_id("weekly").attempts(0);
    assert!(backend
        .add("reports", "build", json!({"params": {}}), custom_invalid)
        .await
        .is_err());

    let job = backend
        .add("reports", "build", json!({"params": {}}), JobOptions::new())
        .await
        .unwrap();
    assert_eq!(job.id, "1");
    assert!(backend.get_job("reports", "weekly").await.unwrap().is_none());

    backend.close().await.unwrap();
}

#[tokio::test]
#[ignore = "Integration test - requires Redis server"]
async fn test_redis_settle_inactive_job_reports_error() {
    let backend = backend("inactive").await;
    let mut subscription = backend.subscribe("reports").await.unwrap();

    let job = backend
        .add("reports", "build", json!({"params": {}}), JobOptions::new())
        .await
        .unwrap();
    assert!(backend
        .move_to_completed("reports", &job.id, json!(null))
        .await
        .is_err());

    let event = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
        .await
        .expect("no event received")
        .unwrap();
    assert!(matches!(event, QueueEvent::Error { id: Some(ref id), .. } if *id == job.id));

    backend.close().await.unwrap();
}
