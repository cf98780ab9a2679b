use std::future::ready;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use health::HealthRegistry;
use tower_http::trace::TraceLayer;

use dedup_common::metrics::track_metrics;

use crate::handlers::{self, AppState};

pub fn router(state: AppState, liveness: HealthRegistry, max_body_size: usize) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/_readiness", get(handlers::readiness))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .route("/publish", post(handlers::publish))
        .route("/events", get(handlers::events))
        .route("/stats", get(handlers::stats))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .layer(DefaultBodyLimit::max(max_body_size))
        .with_state(state)
}
