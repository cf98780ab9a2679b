use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::queue::QueueDepth;
use crate::stats::{Stats, StatsSummary};
use crate::store::{DedupStore, ProcessedRecord, StoreResult};

/// Answer to "how far along is the pipeline".
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsReport {
    #[serde(flatten)]
    pub summary: StatsSummary,
    pub queue_depth: usize,
    pub topics: BTreeSet<String>,
}

/// Read path over what the consumer persisted. Never touches the queue.
#[derive(Clone)]
pub struct QueryFacade {
    store: DedupStore,
    stats: Arc<Stats>,
    depth: QueueDepth,
}

impl QueryFacade {
    pub fn new(store: DedupStore, stats: Arc<Stats>, depth: QueueDepth) -> Self {
        Self {
            store,
            stats,
            depth,
        }
    }

    /// Processed records, optionally of one topic. A blank topic means no filter.
    pub async fn events(&self, topic: Option<&str>) -> StoreResult<Vec<ProcessedRecord>> {
        let topic = topic.map(str::trim).filter(|topic| !topic.is_empty());
        self.store.list(topic).await
    }

    pub async fn topics(&self) -> StoreResult<BTreeSet<String>> {
        self.store.distinct_topics().await
    }

    pub async fn stats(&self) -> StoreResult<StatsReport> {
        Ok(StatsReport {
            summary: self.stats.to_summary(),
            queue_depth: self.depth.get(),
            topics: self.topics().await?,
        })
    }

    /// Number of stored records. Doubles as a storage reachability check.
    pub async fn stored(&self) -> StoreResult<u64> {
        self.store.count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::store::EventStore;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn reports_counters_and_topics() {
        let dir = TempDir::new().unwrap();
        let store = DedupStore::open(dir.path().join("q.db").to_str().unwrap(), 2)
            .await
            .unwrap();
        let stats = Arc::new(Stats::new());
        let facade = QueryFacade::new(store.clone(), stats.clone(), QueueDepth::default());

        for topic in ["stress", "other", "stress"] {
            let event = Event {
                topic: topic.to_owned(),
                event_id: format!("{topic}-{}", store.count().await.unwrap()),
                timestamp: Utc::now(),
                source: "test".to_owned(),
                payload: Default::default(),
            };
            store.insert_if_absent(&event).await.unwrap();
            stats.record_received(1);
            stats.record_unique();
        }

        let report = facade.stats().await.unwrap();
        assert_eq!(report.summary.received, 3);
        assert_eq!(report.summary.unique_processed, 3);
        assert_eq!(report.queue_depth, 0);
        assert_eq!(
            report.topics.into_iter().collect::<Vec<_>>(),
            vec!["other", "stress"]
        );

        assert_eq!(facade.events(Some("stress")).await.unwrap().len(), 2);
        assert_eq!(facade.events(Some("  ")).await.unwrap().len(), 3);
        assert_eq!(facade.events(None).await.unwrap().len(), 3);
        assert_eq!(facade.stored().await.unwrap(), 3);
    }
}
