use std::sync::Arc;

use tracing::warn;

use crate::event::Event;
use crate::queue::{QueueDepth, QueueError, QueueSender};
use crate::stats::Stats;

/// The only write entry point of the pipeline: hands validated events to the queue.
///
/// The dedup outcome of a submitted event is not known here. It is decided later
/// by the consumer and only visible through the stats and query paths.
#[derive(Clone)]
pub struct Ingestor {
    queue: QueueSender,
    stats: Arc<Stats>,
}

impl Ingestor {
    pub fn new(queue: QueueSender, stats: Arc<Stats>) -> Self {
        Self { queue, stats }
    }

    /// Enqueue `events` in order, counting each one as received as soon as it is queued.
    /// Returns how many were enqueued.
    pub async fn submit(&self, events: Vec<Event>) -> Result<usize, QueueError> {
        let total = events.len();
        let mut enqueued = 0;

        for event in events {
            if let Err(error) = self.queue.enqueue(event).await {
                warn!(enqueued, total, "ingestion queue closed during submit");
                return Err(error);
            }
            self.stats.record_received(1);
            enqueued += 1;
        }

        Ok(enqueued)
    }

    pub fn queue_depth(&self) -> QueueDepth {
        self.queue.depth()
    }
}
