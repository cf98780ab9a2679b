use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;

use dedup_common::event::{Event, Payload};

pub const SOURCE: &str = "publisher-service";

/// How many events of a cycle are first occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub unique: usize,
    pub duplicates: usize,
}

impl Plan {
    /// `duplicate_rate` is clamped to `[0, 1]`. A non-empty plan always holds
    /// at least one unique event, so that duplicates have something to repeat.
    pub fn new(total: usize, duplicate_rate: f64) -> Self {
        let rate = duplicate_rate.clamp(0.0, 1.0);
        let unique = ((total as f64) * (1.0 - rate)).floor() as usize;
        let unique = match total {
            0 => 0,
            _ => unique.clamp(1, total),
        };

        Self {
            unique,
            duplicates: total - unique,
        }
    }
}

pub struct Generator {
    topic: String,
    producer_id: String,
}

impl Generator {
    pub fn new(topic: &str, producer_id: &str) -> Self {
        Self {
            topic: topic.to_owned(),
            producer_id: producer_id.to_owned(),
        }
    }

    pub fn event(&self, index: usize, timestamp: DateTime<Utc>) -> Event {
        let mut payload = Payload::new();
        drop(payload.insert("index".to_owned(), json!(index)));
        drop(payload.insert("producer_id".to_owned(), json!(self.producer_id)));
        drop(payload.insert("data".to_owned(), json!(format!("sample-data-{index}"))));

        Event {
            topic: self.topic.clone(),
            event_id: format!("evt-{index}"),
            timestamp,
            source: SOURCE.to_owned(),
            payload,
        }
    }

    /// `plan.unique` distinct events followed by re-sends of randomly chosen ones, shuffled.
    pub fn generate<R: Rng + ?Sized>(&self, plan: Plan, rng: &mut R) -> Vec<Event> {
        let now = Utc::now();
        let mut events: Vec<Event> = (0..plan.unique).map(|i| self.event(i, now)).collect();

        if plan.unique > 0 {
            for _ in 0..plan.duplicates {
                let index = rng.gen_range(0..plan.unique);
                events.push(self.event(index, now));
            }
        }

        events.shuffle(rng);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn plans_unique_and_duplicate_counts() {
        assert_eq!(
            Plan::new(1000, 0.2),
            Plan {
                unique: 800,
                duplicates: 200
            }
        );
        assert_eq!(
            Plan::new(5000, 0.2),
            Plan {
                unique: 4000,
                duplicates: 1000
            }
        );
        assert_eq!(
            Plan::new(10, 0.0),
            Plan {
                unique: 10,
                duplicates: 0
            }
        );
        assert_eq!(
            Plan::new(10, 1.0),
            Plan {
                unique: 1,
                duplicates: 9
            }
        );
        assert_eq!(
            Plan::new(0, 0.5),
            Plan {
                unique: 0,
                duplicates: 0
            }
        );
    }

    #[test]
    fn duplicates_repeat_existing_ids() {
        let generator = Generator::new("demo", "pub-1");
        let mut rng = StdRng::seed_from_u64(7);

        let events = generator.generate(Plan::new(100, 0.3), &mut rng);

        assert_eq!(events.len(), 100);
        let ids: HashSet<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids.len(), 70);
        assert!(ids.iter().all(|id| {
            let index: usize = id.trim_start_matches("evt-").parse().unwrap();
            index < 70
        }));
        assert!(events.iter().all(|e| e.topic == "demo" && e.source == SOURCE));
    }

    #[test]
    fn payload_carries_index_and_producer() {
        let generator = Generator::new("demo", "pub-1");
        let event = generator.event(3, Utc::now());

        assert_eq!(event.event_id, "evt-3");
        assert_eq!(
            serde_json::Value::Object(event.payload),
            json!({"index": 3, "producer_id": "pub-1", "data": "sample-data-3"})
        );
    }
}
