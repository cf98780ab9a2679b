use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::{instrument, warn, Span};

use dedup_common::event::parse_request;
use dedup_common::ingest::Ingestor;
use dedup_common::query::{QueryFacade, StatsReport};

use crate::api::{ApiError, EventsResponse, PublishResponse};

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Ingestor,
    pub query: QueryFacade,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub topic: Option<String>,
}

pub async fn index() -> &'static str {
    "aggregator"
}

/// Validate the whole body, then hand every event to the queue.
/// Answers with the number enqueued, never with the dedup outcome.
#[instrument(skip_all, fields(events = tracing::field::Empty))]
pub async fn publish(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PublishResponse>, ApiError> {
    let events = parse_request(&body).inspect_err(|error| {
        warn!("rejected publish request: {}", error);
    })?;
    Span::current().record("events", events.len());

    let enqueued = state.ingestor.submit(events).await?;

    Ok(Json(PublishResponse { enqueued }))
}

#[instrument(skip_all, fields(topic = query.topic.as_deref()))]
pub async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let events = state.query.events(query.topic.as_deref()).await?;

    Ok(Json(EventsResponse { events }))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsReport>, ApiError> {
    Ok(Json(state.query.stats().await?))
}

/// Ready once the dedup store answers queries.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.query.stored().await {
        Ok(_) => StatusCode::OK,
        Err(error) => {
            warn!("dedup store is not ready: {}", error);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
