#![allow(dead_code)]

use std::path::Path;
use std::sync::Once;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt; // for `collect`
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`
use tracing::Level;

use aggregator::config::{Config, RetryPolicyConfig};
use aggregator::server::Aggregator;
use dedup_common::env::{EnvMsDuration, NonEmptyString};

static TRACING_INIT: Once = Once::new();
pub fn setup_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_writer(tracing_subscriber::fmt::TestWriter::new())
            .init()
    });
}

pub fn test_config(database: &Path) -> Config {
    Config {
        database: NonEmptyString(database.to_str().unwrap().to_owned()),
        host: "127.0.0.1".to_owned(),
        port: 0,
        max_db_connections: 4,
        queue_capacity: 0,
        poll_timeout: EnvMsDuration(Duration::from_millis(50)),
        shutdown_grace_period: EnvMsDuration(Duration::from_secs(5)),
        liveness_deadline: EnvMsDuration(Duration::from_secs(30)),
        retry_policy: RetryPolicyConfig {
            max_attempts: 3,
            backoff_coefficient: 2,
            initial_interval: EnvMsDuration(Duration::from_millis(10)),
            maximum_interval: EnvMsDuration(Duration::from_millis(50)),
        },
        export_prometheus: false,
        max_body_size: 1024 * 1024,
        otel_url: None,
        otel_sampling_rate: 0.0,
        otel_service_name: "aggregator-testing".to_owned(),
        log_level: Level::INFO,
    }
}

pub async fn start(database: &Path) -> Aggregator {
    setup_tracing();
    Aggregator::build(&test_config(database))
        .await
        .expect("failed to build aggregator")
}

pub fn event(topic: &str, event_id: &str) -> Value {
    json!({
        "topic": topic,
        "event_id": event_id,
        "timestamp": "2024-05-01T12:00:00Z",
        "source": "integration-test",
        "payload": {"event_id": event_id},
    })
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);

    (status, body)
}

pub async fn publish_raw(router: &Router, body: impl Into<Body>) -> (StatusCode, Value) {
    send(
        router,
        Request::builder()
            .method(Method::POST)
            .uri("/publish")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap(),
    )
    .await
}

pub async fn publish(router: &Router, body: &Value) -> (StatusCode, Value) {
    publish_raw(router, body.to_string()).await
}

pub async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    send(router, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

pub async fn drained_stats(aggregator: &Aggregator) -> Value {
    assert!(
        aggregator.depth.wait_for_drain(Duration::from_secs(10)).await,
        "queue did not drain"
    );
    let (status, stats) = get(&aggregator.router, "/stats").await;
    assert_eq!(status, StatusCode::OK);
    stats
}
