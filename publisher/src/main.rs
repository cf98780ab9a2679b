//! Publish generated events to an aggregator, re-sending a share of them to exercise deduplication.
use anyhow::{bail, Context};
use envconfig::Envconfig;
use tokio::signal::unix::{signal, SignalKind};
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use publisher::client::AggregatorClient;
use publisher::config::{Config, Mode};
use publisher::generator::{Generator, Plan};

#[derive(Debug, Default)]
struct CycleReport {
    sent: usize,
    failed: usize,
}

async fn wait_for_aggregator(client: &AggregatorClient, config: &Config) -> bool {
    info!("Waiting for aggregator to be ready...");
    for attempt in 1..=config.ready_retries {
        match client.stats().await {
            Ok(stats) => {
                info!("Aggregator is ready, stats: {}", stats);
                return true;
            }
            Err(error) => warn!(
                attempt,
                retries = config.ready_retries,
                "aggregator not ready: {}",
                error
            ),
        }
        tokio::time::sleep(config.ready_delay.0).await;
    }
    false
}

async fn run_cycle(client: &AggregatorClient, config: &Config) -> CycleReport {
    let plan = Plan::new(config.total_events, config.duplicate_rate);
    info!(
        total = config.total_events,
        unique = plan.unique,
        duplicates = plan.duplicates,
        "generating events"
    );
    let events = Generator::new(config.topic.as_str(), config.producer_id.as_str())
        .generate(plan, &mut rand::thread_rng());

    let mut report = CycleReport::default();
    for batch in events.chunks(config.batch_size.max(1)) {
        match client.publish(batch).await {
            Ok(response) => {
                info!(sent = batch.len(), enqueued = response.enqueued, "sent batch");
                report.sent += batch.len();
            }
            Err(error) => {
                error!(size = batch.len(), "failed to send batch: {}", error);
                report.failed += batch.len();
            }
        }
        tokio::time::sleep(config.batch_delay.0).await;
    }
    report
}

async fn log_stats(client: &AggregatorClient) {
    match client.stats().await {
        Ok(stats) => info!("Aggregator stats: {}", stats),
        Err(error) => warn!("failed to read aggregator stats: {}", error),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::init_from_env().context("Invalid configuration")?;
    let client = AggregatorClient::new(&config.aggregator_url, config.request_timeout.0)
        .context("failed to build aggregator client")?;

    info!("Publisher starting, aggregator at {}", config.aggregator_url);
    if !wait_for_aggregator(&client, &config).await {
        bail!("aggregator at {} never became ready", config.aggregator_url);
    }

    match config.mode {
        Mode::OneShot => {
            let report = run_cycle(&client, &config).await;
            info!(sent = report.sent, failed = report.failed, "Publishing complete");
            log_stats(&client).await;
        }
        Mode::Continuous => {
            let mut term =
                signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
            let mut interrupt =
                signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;

            let mut cycle: u64 = 0;
            loop {
                cycle += 1;
                let publishing = async {
                    info!(cycle, "starting publishing cycle");
                    let report = run_cycle(&client, &config).await;
                    info!(
                        cycle,
                        sent = report.sent,
                        failed = report.failed,
                        "cycle complete"
                    );
                    log_stats(&client).await;
                    tokio::time::sleep(config.interval.0).await;
                };

                tokio::select! {
                    _ = term.recv() => break,
                    _ = interrupt.recv() => break,
                    _ = publishing => {},
                }
            }
            info!("Shutting down gracefully...");
        }
    }

    Ok(())
}
