use std::sync::Arc;
use std::time;

use dedup_common::event::Event;
use dedup_common::queue::{QueueReceiver, Received};
use dedup_common::retry::RetryPolicy;
use dedup_common::stats::Stats;
use dedup_common::store::EventStore;
use health::{ComponentStatus, HealthHandle};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Running,
    /// Asked to stop, finishing the event in hand
    Stopping,
    Stopped,
}

/// What became of one dequeued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Unique,
    Duplicate,
    /// Every attempt to write it failed, the event was dropped
    Failed,
}

/// The single task draining the ingestion queue into the dedup store.
///
/// Events are handled one at a time in queue order: each one is written with
/// `insert_if_absent`, the outcome is counted, and only then is the event
/// acknowledged. Storage errors are retried with backoff, and an event that
/// exhausts its attempts is counted as `storage_failed` without stopping the loop.
pub struct Consumer {
    /// The queue we will be receiving events from.
    receiver: QueueReceiver,
    /// Where first occurrences end up.
    store: Arc<dyn EventStore + Send + Sync>,
    stats: Arc<Stats>,
    /// How long to wait on an empty queue before reporting liveness again.
    poll_timeout: time::Duration,
    /// The retry policy used when a write fails for a reason other than a duplicate key.
    retry_policy: RetryPolicy,
    /// The liveness check handle, to call on a schedule to report healthy
    liveness: HealthHandle,
}

impl Consumer {
    pub fn new(
        receiver: QueueReceiver,
        store: Arc<dyn EventStore + Send + Sync>,
        stats: Arc<Stats>,
        poll_timeout: time::Duration,
        retry_policy: RetryPolicy,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            receiver,
            store,
            stats,
            poll_timeout,
            retry_policy,
            liveness,
        }
    }

    /// Start consuming on a new task.
    pub fn spawn(self) -> ConsumerHandle {
        let cancel = CancellationToken::new();
        let (state, _) = watch::channel(ConsumerState::Running);
        let state = Arc::new(state);

        let task = tokio::spawn(self.run(cancel.clone(), state.clone()));

        ConsumerHandle {
            cancel,
            state,
            task,
        }
    }

    /// Consume until cancelled or until every producer is gone.
    async fn run(mut self, cancel: CancellationToken, state: Arc<watch::Sender<ConsumerState>>) {
        info!(
            poll_timeout = ?self.poll_timeout,
            max_attempts = self.retry_policy.max_attempts(),
            "consumer started"
        );

        // Set after an event was dropped, so the Unhealthy report holds until an iteration succeeds.
        let mut failing = false;

        loop {
            if !failing {
                self.liveness.report_healthy().await;
            }

            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.receiver.recv_timeout(self.poll_timeout) => received,
            };

            match received {
                Received::Event(event) => {
                    let outcome = self.process(&event).await;
                    self.receiver.ack();
                    failing = outcome == ProcessOutcome::Failed;
                }
                Received::Idle => failing = false,
                Received::Closed => {
                    info!("ingestion queue closed");
                    break;
                }
            }
        }

        _ = state.send_replace(ConsumerState::Stopping);

        let abandoned = self.receiver.close();
        if abandoned > 0 {
            warn!(abandoned, "consumer stopped with events still queued");
        }

        _ = state.send_replace(ConsumerState::Stopped);
        info!("consumer stopped");
    }

    /// Write one event, retrying storage errors, and count its outcome.
    async fn process(&self, event: &Event) -> ProcessOutcome {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.store.insert_if_absent(event).await {
                Ok(true) => {
                    self.stats.record_unique();
                    debug!(topic = %event.topic, event_id = %event.event_id, "stored new event");
                    return ProcessOutcome::Unique;
                }
                Ok(false) => {
                    self.stats.record_duplicate();
                    info!(topic = %event.topic, event_id = %event.event_id, "dropped duplicate event");
                    return ProcessOutcome::Duplicate;
                }
                Err(error) if self.retry_policy.should_retry(attempt) => {
                    let interval = self.retry_policy.retry_interval(attempt);
                    warn!(
                        topic = %event.topic,
                        event_id = %event.event_id,
                        attempt,
                        ?interval,
                        "failed to store event, will retry: {}",
                        error
                    );
                    metrics::counter!("dedup_store_retries_total").increment(1);
                    tokio::time::sleep(interval).await;
                }
                Err(error) => {
                    error!(
                        topic = %event.topic,
                        event_id = %event.event_id,
                        attempts = attempt,
                        "failed to store event, dropping it: {}",
                        error
                    );
                    self.stats.record_storage_failure();
                    self.liveness
                        .report_status(ComponentStatus::Unhealthy)
                        .await;
                    return ProcessOutcome::Failed;
                }
            }
        }
    }
}

/// Owner's view of a spawned consumer.
pub struct ConsumerHandle {
    cancel: CancellationToken,
    state: Arc<watch::Sender<ConsumerState>>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Ask the consumer to stop after the event in hand. Does not wait.
    pub fn stop(&self) {
        self.cancel.cancel();
        _ = self.state.send_if_modified(|state| {
            if *state == ConsumerState::Running {
                *state = ConsumerState::Stopping;
                true
            } else {
                false
            }
        });
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the consumer and wait up to `grace` for it to finish.
    /// A consumer still running after `grace` is aborted.
    pub async fn shutdown(mut self, grace: time::Duration) -> Result<(), WorkerError> {
        self.stop();

        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(joined) => joined.map_err(WorkerError::from),
            Err(_) => {
                self.task.abort();
                Err(WorkerError::ShutdownTimeout(grace))
            }
        }
    }
}
