use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Running counters of the ingestion pipeline.
///
/// Shared by reference between the publish path, which counts `received`,
/// and the consumer, which counts the outcome of every dequeued event. Once
/// the queue is drained `received == unique_processed + duplicate_dropped + storage_failed`.
///
/// Counters live for the lifetime of the value: a restarted process, or a
/// fresh `Stats` in a test, starts from zero.
#[derive(Debug)]
pub struct Stats {
    received: AtomicU64,
    unique_processed: AtomicU64,
    duplicate_dropped: AtomicU64,
    storage_failed: AtomicU64,
    started_at: Instant,
}

/// A point-in-time copy of the counters. Not guaranteed to reflect a drained queue.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSummary {
    pub received: u64,
    pub unique_processed: u64,
    pub duplicate_dropped: u64,
    pub storage_failed: u64,
    pub uptime_seconds: u64,
}

impl StatsSummary {
    /// Events that have reached a final outcome.
    pub fn settled(&self) -> u64 {
        self.unique_processed + self.duplicate_dropped + self.storage_failed
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            unique_processed: AtomicU64::new(0),
            duplicate_dropped: AtomicU64::new(0),
            storage_failed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record_received(&self, count: u64) {
        self.received.fetch_add(count, Ordering::Relaxed);
        metrics::counter!("dedup_events_received_total").increment(count);
    }

    pub fn record_unique(&self) {
        self.unique_processed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("dedup_events_unique_total").increment(1);
    }

    pub fn record_duplicate(&self) {
        self.duplicate_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("dedup_events_duplicate_total").increment(1);
    }

    pub fn record_storage_failure(&self) {
        self.storage_failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("dedup_events_storage_failed_total").increment(1);
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn to_summary(&self) -> StatsSummary {
        StatsSummary {
            received: self.received.load(Ordering::Relaxed),
            unique_processed: self.unique_processed.load(Ordering::Relaxed),
            duplicate_dropped: self.duplicate_dropped.load(Ordering::Relaxed),
            storage_failed: self.storage_failed.load(Ordering::Relaxed),
            uptime_seconds: self.uptime().as_secs(),
        }
    }
}
