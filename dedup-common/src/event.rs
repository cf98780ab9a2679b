use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Arbitrary producer data attached to an event. Key order is preserved so
/// that the stored JSON is byte-for-byte what we serialized.
pub type Payload = Map<String, Value>;

/// Enumeration of reasons an incoming event is rejected before it reaches the queue.
#[derive(Error, Debug, PartialEq)]
pub enum SchemaError {
    #[error("failed to parse request: {0}")]
    MalformedRequest(String),
    #[error("event is not a JSON object")]
    NotAnObject,
    #[error("field `{0}` is required")]
    MissingField(&'static str),
    #[error("field `{0}` must not be empty")]
    BlankField(&'static str),
    #[error("field `{0}` must be a string")]
    NotAString(&'static str),
    #[error("timestamp {0} is not a valid datetime")]
    InvalidTimestamp(String),
    #[error("payload must be a JSON object")]
    InvalidPayload,
    #[error("event {index} is invalid: {reason}")]
    InvalidEvent {
        index: usize,
        reason: Box<SchemaError>,
    },
}

/// A validated event, ready to be queued.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(default)]
    pub payload: Payload,
}

impl Event {
    /// Validate a single candidate event.
    ///
    /// `topic`, `event_id` and `source` must be non-blank strings, `timestamp` must parse,
    /// and `payload` must be an object when present (it defaults to `{}`).
    pub fn from_value(value: Value) -> Result<Event, SchemaError> {
        let Value::Object(mut fields) = value else {
            return Err(SchemaError::NotAnObject);
        };

        let topic = required_text(&mut fields, "topic")?;
        let event_id = required_text(&mut fields, "event_id")?;
        let source = required_text(&mut fields, "source")?;

        let timestamp = match fields.remove("timestamp") {
            None | Some(Value::Null) => return Err(SchemaError::MissingField("timestamp")),
            Some(value) => parse_timestamp(&value)?,
        };

        let payload = match fields.remove("payload") {
            None | Some(Value::Null) => Payload::new(),
            Some(Value::Object(payload)) => payload,
            Some(_) => return Err(SchemaError::InvalidPayload),
        };

        Ok(Event {
            topic,
            event_id,
            timestamp,
            source,
            payload,
        })
    }

    /// Canonical representation of the timestamp, as persisted.
    pub fn timestamp_string(&self) -> String {
        format_timestamp(&self.timestamp)
    }

    /// Canonical JSON of the payload, as persisted.
    pub fn payload_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.payload)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRequest {
    /// Batch of events
    Batch(Vec<Value>),
    /// Single event
    One(Value),
}

/// Decode a publish body holding either one event or an array of events.
///
/// Validation is all-or-nothing for the request: the first invalid item
/// fails the whole call and its position is reported.
pub fn parse_request(body: &[u8]) -> Result<Vec<Event>, SchemaError> {
    let request: RawRequest = serde_json::from_slice(body)
        .map_err(|e| SchemaError::MalformedRequest(e.to_string()))?;

    match request {
        RawRequest::One(value) => Ok(vec![Event::from_value(value)?]),
        RawRequest::Batch(values) => values
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                Event::from_value(value).map_err(|reason| SchemaError::InvalidEvent {
                    index,
                    reason: Box::new(reason),
                })
            })
            .collect(),
    }
}

fn required_text(fields: &mut Payload, name: &'static str) -> Result<String, SchemaError> {
    match fields.remove(name) {
        None | Some(Value::Null) => Err(SchemaError::MissingField(name)),
        Some(Value::String(text)) if text.trim().is_empty() => Err(SchemaError::BlankField(name)),
        Some(Value::String(text)) => Ok(text),
        Some(_) => Err(SchemaError::NotAString(name)),
    }
}

/// Accepts RFC 3339 strings, naive ISO 8601 datetimes (taken as UTC), and unix
/// timestamps in seconds.
pub fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, SchemaError> {
    let invalid = || SchemaError::InvalidTimestamp(value.to_string());

    match value {
        Value::String(text) => {
            let text = text.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Ok(parsed.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .map(|naive| Utc.from_utc_datetime(&naive))
                .ok_or_else(invalid)
        }
        Value::Number(number) => {
            let seconds = number.as_f64().ok_or_else(invalid)?;
            let whole = seconds.floor();
            let nanos = ((seconds - whole) * 1e9).round() as u32;
            DateTime::from_timestamp(whole as i64, nanos.min(999_999_999)).ok_or_else(invalid)
        }
        _ => Err(invalid()),
    }
}

/// Fixed-width UTC rendering, so lexicographic order in storage is chronological order.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}
