use std::future::Future;
use std::sync::Arc;
use std::time;

use anyhow::Context;
use axum::Router;
use health::HealthRegistry;
use tokio::net::TcpListener;
use tracing::{error, info};

use dedup_common::ingest::Ingestor;
use dedup_common::metrics::setup_metrics_routes;
use dedup_common::query::QueryFacade;
use dedup_common::queue::{self, QueueDepth};
use dedup_common::stats::Stats;
use dedup_common::store::DedupStore;
use dedup_worker::consumer::{Consumer, ConsumerHandle};
use dedup_worker::error::WorkerError;

use crate::config::Config;
use crate::handlers::AppState;
use crate::router::router;

/// A wired pipeline: the HTTP router in front, the consumer behind it, the store under both.
pub struct Aggregator {
    pub router: Router,
    pub store: DedupStore,
    pub depth: QueueDepth,
    consumer: ConsumerHandle,
}

impl Aggregator {
    /// Open the store and start the consumer. An unreachable store is an error.
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let store = DedupStore::open(config.database.as_str(), config.max_db_connections)
            .await
            .with_context(|| format!("failed to open dedup store {}", config.database.as_str()))?;

        let stats = Arc::new(Stats::new());
        let (sender, receiver) = queue::channel(config.queue_capacity());
        let depth = sender.depth();

        let liveness = HealthRegistry::new("liveness");
        let consumer_liveness = liveness
            .register("consumer".to_owned(), config.liveness_deadline.0)
            .await;

        let consumer = Consumer::new(
            receiver,
            Arc::new(store.clone()),
            stats.clone(),
            config.poll_timeout.0,
            config.retry_policy.provide(),
            consumer_liveness,
        )
        .spawn();

        let state = AppState {
            ingestor: Ingestor::new(sender, stats.clone()),
            query: QueryFacade::new(store.clone(), stats, depth.clone()),
        };

        Ok(Self {
            router: router(state, liveness, config.max_body_size),
            store,
            depth,
            consumer,
        })
    }

    pub fn consumer(&self) -> &ConsumerHandle {
        &self.consumer
    }

    /// Stop the consumer within `grace`, then close the store.
    /// Events still queued at this point are lost.
    pub async fn shutdown(self, grace: time::Duration) -> Result<(), WorkerError> {
        let stopped = self.consumer.shutdown(grace).await;
        self.store.close().await;
        stopped
    }
}

/// Serve until `shutdown` resolves, then stop the pipeline.
pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let aggregator = Aggregator::build(&config).await?;

    let app = aggregator.router.clone();
    // Don't install metrics unless asked to
    // Installing a global recorder when used as a library (during tests etc)
    // does not work well.
    let app = if config.export_prometheus {
        setup_metrics_routes(app).context("failed to install metrics recorder")?
    } else {
        app
    };

    info!("listening on {:?}", listener.local_addr()?);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;

    info!("http server stopped, stopping consumer");
    if let Err(error) = aggregator.shutdown(config.shutdown_grace_period.0).await {
        error!("consumer did not stop cleanly: {}", error);
    }

    served.context("http server failed")
}
