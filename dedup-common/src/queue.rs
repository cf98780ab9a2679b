use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::event::Event;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("ingestion queue is closed, the consumer is not running")]
    Closed,
}

/// Number of events enqueued and not yet acknowledged by the consumer.
/// Zero means the queue is drained and the consumer is idle.
#[derive(Clone, Debug, Default)]
pub struct QueueDepth(Arc<AtomicUsize>);

impl QueueDepth {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    pub fn is_drained(&self) -> bool {
        self.get() == 0
    }

    /// Poll until drained or until `timeout` elapses. Returns whether the queue drained.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.is_drained() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    fn increment(&self) {
        let depth = self.0.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::gauge!("dedup_queue_depth").set(depth as f64);
    }

    fn decrement(&self) {
        let depth = self.0.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        metrics::gauge!("dedup_queue_depth").set(depth as f64);
    }
}

#[derive(Clone)]
enum Tx {
    Bounded(mpsc::Sender<Event>),
    Unbounded(mpsc::UnboundedSender<Event>),
}

enum Rx {
    Bounded(mpsc::Receiver<Event>),
    Unbounded(mpsc::UnboundedReceiver<Event>),
}

/// Producer side of the ingestion queue. Cheap to clone, one per request is fine.
#[derive(Clone)]
pub struct QueueSender {
    tx: Tx,
    depth: QueueDepth,
}

/// Consumer side of the ingestion queue. There is exactly one.
pub struct QueueReceiver {
    rx: Rx,
    depth: QueueDepth,
}

/// What a bounded wait on the queue produced.
#[derive(Debug, PartialEq)]
pub enum Received {
    Event(Event),
    /// Nothing arrived before the timeout
    Idle,
    /// Every sender is gone and the queue is empty
    Closed,
}

/// Create the FIFO hand-off between producers and the single consumer.
/// `capacity` of `None` makes the queue unbounded; otherwise producers wait while it is full.
pub fn channel(capacity: Option<usize>) -> (QueueSender, QueueReceiver) {
    let depth = QueueDepth::default();
    let (tx, rx) = match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (Tx::Bounded(tx), Rx::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Tx::Unbounded(tx), Rx::Unbounded(rx))
        }
    };

    (
        QueueSender {
            tx,
            depth: depth.clone(),
        },
        QueueReceiver { rx, depth },
    )
}

impl QueueSender {
    /// Append one event. Only waits when the queue is bounded and full.
    /// Cancel safe: dropped while waiting for room, nothing is enqueued or counted.
    pub async fn enqueue(&self, event: Event) -> Result<(), QueueError> {
        match &self.tx {
            Tx::Bounded(tx) => {
                let permit = tx.reserve().await.map_err(|_| QueueError::Closed)?;
                // Counted before the send so the consumer can never acknowledge an uncounted item.
                self.depth.increment();
                permit.send(event);
            }
            Tx::Unbounded(tx) => {
                self.depth.increment();
                if tx.send(event).is_err() {
                    self.depth.decrement();
                    return Err(QueueError::Closed);
                }
            }
        }
        Ok(())
    }

    pub fn depth(&self) -> QueueDepth {
        self.depth.clone()
    }
}

impl QueueReceiver {
    /// Wait at most `timeout` for the next event.
    /// Cancel safe: an event is never lost if the returned future is dropped.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Received {
        let next = match &mut self.rx {
            Rx::Bounded(rx) => tokio::time::timeout(timeout, rx.recv()).await,
            Rx::Unbounded(rx) => tokio::time::timeout(timeout, rx.recv()).await,
        };

        match next {
            Ok(Some(event)) => Received::Event(event),
            Ok(None) => Received::Closed,
            Err(_) => Received::Idle,
        }
    }

    /// Mark the last received event as fully handled, whatever its outcome.
    pub fn ack(&self) {
        self.depth.decrement();
    }

    /// Refuse further events and discard what is still queued. Returns how many were abandoned.
    pub fn close(&mut self) -> usize {
        let mut abandoned = 0;
        match &mut self.rx {
            Rx::Bounded(rx) => {
                rx.close();
                while rx.try_recv().is_ok() {
                    abandoned += 1;
                }
            }
            Rx::Unbounded(rx) => {
                rx.close();
                while rx.try_recv().is_ok() {
                    abandoned += 1;
                }
            }
        }
        for _ in 0..abandoned {
            self.depth.decrement();
        }
        abandoned
    }
}
