use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::event::{Event, Payload};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Serializes schema creation across every store opened by this process.
static SCHEMA_LOCK: Mutex<()> = Mutex::const_new(());

/// Enumeration of unexpected storage failures.
/// A key that already exists is not one of them: it is the `false` outcome of
/// `insert_if_absent`.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError {
        command: &'static str,
        error: sqlx::Error,
    },
    #[error("failed to serialize payload: {0}")]
    PayloadError(#[from] serde_json::Error),
    #[error("stored record {topic}:{event_id} is malformed: {reason}")]
    MalformedRecord {
        topic: String,
        event_id: String,
        reason: String,
    },
    #[error("COUNT returned a negative row count: {0}")]
    NegativeCount(i64),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

fn query_error(command: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |error| StoreError::QueryError { command, error }
}

/// A record the consumer accepted as new. Never updated once written.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessedRecord {
    pub topic: String,
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub payload: Payload,
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    topic: String,
    event_id: String,
    timestamp: String,
    source: String,
    payload: String,
}

impl TryFrom<RecordRow> for ProcessedRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let malformed = |reason: String| StoreError::MalformedRecord {
            topic: row.topic.clone(),
            event_id: row.event_id.clone(),
            reason,
        };

        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .map_err(|e| malformed(format!("timestamp: {e}")))?
            .with_timezone(&Utc);
        let payload = serde_json::from_str::<Payload>(&row.payload)
            .map_err(|e| malformed(format!("payload: {e}")))?;

        Ok(ProcessedRecord {
            topic: row.topic,
            event_id: row.event_id,
            timestamp,
            source: row.source,
            payload,
        })
    }
}

/// Write side of the dedup table, as seen by the consumer.
#[async_trait]
pub trait EventStore {
    /// Create the record for `(topic, event_id)` unless it already exists.
    /// Returns `true` when the record was created, `false` when the key was taken.
    async fn insert_if_absent(&self, event: &Event) -> StoreResult<bool>;
}

/// Dedup table backed by a SQLite file.
///
/// The composite primary key `(topic, event_id)` is the only concurrency control:
/// `INSERT .. ON CONFLICT DO NOTHING` is atomic per key, so out of any number of
/// concurrent inserts of one key exactly one reports a new row.
#[derive(Clone)]
pub struct DedupStore {
    pool: SqlitePool,
}

impl DedupStore {
    /// Open (creating if needed) the store at `location`, a file path or a `sqlite:` DSN.
    pub async fn open(location: &str, max_connections: u32) -> StoreResult<Self> {
        let options = connect_options(location)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;

        info!(location, "opened dedup store");
        Self::new_from_pool(pool).await
    }

    pub async fn new_from_pool(pool: SqlitePool) -> StoreResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        let _guard = SCHEMA_LOCK.lock().await;

        let mut tx = self.pool.begin().await.map_err(query_error("BEGIN"))?;
        sqlx::query(
            r#"
CREATE TABLE IF NOT EXISTS processed (
    topic TEXT NOT NULL,
    event_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    source TEXT NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (topic, event_id)
)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(query_error("CREATE TABLE"))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_topic_timestamp ON processed (topic, timestamp)")
            .execute(&mut *tx)
            .await
            .map_err(query_error("CREATE INDEX"))?;

        tx.commit().await.map_err(query_error("COMMIT"))
    }

    /// All records, or those of one topic, by timestamp then insertion order.
    #[instrument(skip(self))]
    pub async fn list(&self, topic: Option<&str>) -> StoreResult<Vec<ProcessedRecord>> {
        let rows = match topic {
            Some(topic) => {
                sqlx::query_as::<_, RecordRow>(
                    r#"
SELECT topic, event_id, timestamp, source, payload
FROM processed
WHERE topic = ?
ORDER BY timestamp, rowid
                    "#,
                )
                .bind(topic)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, RecordRow>(
                    r#"
SELECT topic, event_id, timestamp, source, payload
FROM processed
ORDER BY timestamp, rowid
                    "#,
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(query_error("SELECT"))?;

        rows.into_iter().map(ProcessedRecord::try_from).collect()
    }

    pub async fn count(&self) -> StoreResult<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM processed")
            .fetch_one(&self.pool)
            .await
            .map_err(query_error("COUNT"))?;

        row_count(count)
    }

    pub async fn distinct_topics(&self) -> StoreResult<BTreeSet<String>> {
        let topics = sqlx::query_scalar::<_, String>("SELECT DISTINCT topic FROM processed")
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("SELECT DISTINCT"))?;

        Ok(topics.into_iter().collect())
    }

    pub async fn close(&self) {
        self.pool.close().await
    }
}

#[async_trait]
impl EventStore for DedupStore {
    #[instrument(skip_all, fields(topic = %event.topic, event_id = %event.event_id))]
    async fn insert_if_absent(&self, event: &Event) -> StoreResult<bool> {
        let payload = event.payload_json()?;
        let start = Instant::now();

        let result = sqlx::query(
            r#"
INSERT INTO processed (topic, event_id, timestamp, source, payload)
VALUES (?, ?, ?, ?, ?)
ON CONFLICT (topic, event_id) DO NOTHING
            "#,
        )
        .bind(&event.topic)
        .bind(&event.event_id)
        .bind(event.timestamp_string())
        .bind(&event.source)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(query_error("INSERT"))?;

        metrics::histogram!("dedup_store_insert_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        Ok(result.rows_affected() == 1)
    }
}

fn row_count(count: i64) -> StoreResult<u64> {
    u64::try_from(count).map_err(|_| StoreError::NegativeCount(count))
}

fn connect_options(location: &str) -> StoreResult<SqliteConnectOptions> {
    let options = if location.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(location)
            .map_err(|error| StoreError::ConnectionError { error })?
    } else {
        SqliteConnectOptions::new().filename(location)
    };

    Ok(options
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT))
}
