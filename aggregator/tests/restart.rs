use std::time::Duration;

use assert_json_diff::assert_json_include;
use axum::http::StatusCode;
use dedup_worker::consumer::ConsumerState;
use serde_json::json;
use tempfile::TempDir;

mod common;
use common::*;

#[tokio::test]
async fn dedup_survives_a_restart() {
    let dir = TempDir::new().unwrap();
    let database = dir.path().join("dedup.db");

    let first = start(&database).await;
    publish(&first.router, &json!([event("t1", "id-1"), event("t1", "id-2")])).await;
    assert_json_include!(
        actual: drained_stats(&first).await,
        expected: json!({"received": 2, "unique_processed": 2})
    );
    first.shutdown(Duration::from_secs(1)).await.unwrap();

    let second = start(&database).await;
    let (status, _) = publish(&second.router, &event("t1", "id-1")).await;
    assert_eq!(status, StatusCode::OK);

    // Counters start over, the dedup table does not.
    assert_json_include!(
        actual: drained_stats(&second).await,
        expected: json!({
            "received": 1,
            "unique_processed": 0,
            "duplicate_dropped": 1,
            "topics": ["t1"],
        })
    );
    let (_, events) = get(&second.router, "/events").await;
    assert_eq!(events["events"].as_array().unwrap().len(), 2);

    second.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn publishing_after_shutdown_is_refused() {
    let dir = TempDir::new().unwrap();
    let aggregator = start(&dir.path().join("dedup.db")).await;
    let router = aggregator.router.clone();

    aggregator.consumer().stop();
    for _ in 0..100 {
        if aggregator.consumer().state() == ConsumerState::Stopped {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(aggregator.consumer().state(), ConsumerState::Stopped);

    let (status, body) = publish(&router, &event("t1", "id-1")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());

    aggregator.shutdown(Duration::from_secs(1)).await.unwrap();
}
