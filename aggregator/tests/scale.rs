use std::time::Duration;

use assert_json_diff::assert_json_include;
use axum::http::StatusCode;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::task::JoinSet;

mod common;
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publishers_with_twenty_percent_duplicates() {
    let dir = TempDir::new().unwrap();
    let aggregator = start(&dir.path().join("dedup.db")).await;

    // 4000 unique keys, then 1000 re-sends of the first 1000, interleaved.
    let mut events: Vec<Value> = (0..4000)
        .map(|i| event("scale", &format!("evt-{i}")))
        .collect();
    for i in 0..1000 {
        events.insert(i * 5 + 4, event("scale", &format!("evt-{i}")));
    }
    assert_eq!(events.len(), 5000);

    let mut publishers = JoinSet::new();
    for chunk in events.chunks(100) {
        let router = aggregator.router.clone();
        let batch = Value::Array(chunk.to_vec());
        publishers.spawn(async move { publish(&router, &batch).await });
    }

    let mut enqueued = 0;
    while let Some(result) = publishers.join_next().await {
        let (status, body) = result.unwrap();
        assert_eq!(status, StatusCode::OK);
        enqueued += body["enqueued"].as_u64().unwrap();
    }
    assert_eq!(enqueued, 5000);

    assert_json_include!(
        actual: drained_stats(&aggregator).await,
        expected: json!({
            "received": 5000,
            "unique_processed": 4000,
            "duplicate_dropped": 1000,
            "storage_failed": 0,
            "queue_depth": 0,
            "topics": ["scale"],
        })
    );
    assert_eq!(aggregator.store.count().await.unwrap(), 4000);

    aggregator.shutdown(Duration::from_secs(5)).await.unwrap();
}
