use std::time;

use reqwest::header;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use dedup_common::event::Event;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid aggregator url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("request to aggregator failed: {0}")]
    RequestError(#[from] reqwest::Error),
}

#[derive(Debug, PartialEq, Eq, Deserialize)]
pub struct PublishResponse {
    pub enqueued: usize,
}

/// HTTP client for the aggregator's publish and stats endpoints.
pub struct AggregatorClient {
    client: reqwest::Client,
    publish_url: Url,
    stats_url: Url,
}

impl AggregatorClient {
    pub fn new(base: &Url, request_timeout: time::Duration) -> Result<Self, ClientError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("dedup-publisher")
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            publish_url: base.join("publish")?,
            stats_url: base.join("stats")?,
        })
    }

    /// Send one batch. Any non-2xx answer is an error.
    pub async fn publish(&self, events: &[Event]) -> Result<PublishResponse, ClientError> {
        let response = self
            .client
            .post(self.publish_url.clone())
            .json(events)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    pub async fn stats(&self) -> Result<Value, ClientError> {
        let response = self
            .client
            .get(self.stats_url.clone())
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{Generator, Plan};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    async fn serve(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        Url::parse(&format!("http://{address}")).unwrap()
    }

    #[tokio::test]
    async fn publishes_batches_and_reads_stats() {
        let router = Router::new()
            .route(
                "/publish",
                post(|Json(events): Json<Vec<Value>>| async move {
                    Json(json!({"enqueued": events.len()}))
                }),
            )
            .route("/stats", get(|| async { Json(json!({"received": 3})) }));
        let base = serve(router).await;

        let client = AggregatorClient::new(&base, time::Duration::from_secs(5)).unwrap();
        let events = Generator::new("demo", "pub-1")
            .generate(Plan::new(3, 0.0), &mut StdRng::seed_from_u64(1));

        assert_eq!(
            client.publish(&events).await.unwrap(),
            PublishResponse { enqueued: 3 }
        );
        assert_eq!(client.stats().await.unwrap(), json!({"received": 3}));
    }

    #[tokio::test]
    async fn rejected_batch_is_an_error() {
        let router = Router::new().route(
            "/publish",
            post(|| async { StatusCode::UNPROCESSABLE_ENTITY }),
        );
        let base = serve(router).await;

        let client = AggregatorClient::new(&base, time::Duration::from_secs(5)).unwrap();
        let events = Generator::new("demo", "pub-1")
            .generate(Plan::new(1, 0.0), &mut StdRng::seed_from_u64(1));

        assert!(matches!(
            client.publish(&events).await,
            Err(ClientError::RequestError(_))
        ));
    }
}
