use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Payload field names stored with every point.
pub mod fields {
    pub const MAIL_ID: &str = "mail_id";
    pub const THREAD_ID: &str = "thread_id";
    pub const SENDER: &str = "sender";
    pub const DATE: &str = "date";
    pub const DATA: &str = "data";
    pub const CONSUMED: &str = "consumed";
}

/// Light identifier for a harvested unit.
///
/// Its string form (the `id`) is what travels through the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    pub thread_id: String,
}

impl Metadata {
    pub fn new(id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
        }
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Fully fetched unit: metadata plus sender, timestamp and body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub metadata: Metadata,
    pub sender: String,
    pub date: Option<DateTime<Utc>>,
    pub body: String,
}

impl Record {
    /// Text used for embedding and prompt packing.
    pub fn text(&self) -> &str {
        &self.body
    }
}

/// Payload stored alongside each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub mail_id: String,
    pub thread_id: String,
    pub sender: String,
    /// Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<f64>,
    pub data: String,
    #[serde(default)]
    pub consumed: bool,
}

impl PointPayload {
    /// Payload for a freshly ingested record; always unconsumed.
    pub fn from_record(record: &Record) -> Self {
        Self {
            mail_id: record.metadata.id.clone(),
            thread_id: record.metadata.thread_id.clone(),
            sender: record.sender.clone(),
            date: record.date.map(|date| date.timestamp() as f64),
            data: record.body.clone(),
            consumed: false,
        }
    }

    pub fn into_record(self) -> Record {
        Record {
            metadata: Metadata::new(self.mail_id, self.thread_id),
            sender: self.sender,
            date: self
                .date
                .and_then(|secs| DateTime::from_timestamp(secs as i64, 0)),
            body: self.data,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// A point to be written to a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// A point read back by payload lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPoint {
    pub id: Uuid,
    pub vector: Option<Vec<f32>>,
    pub payload: PointPayload,
}

/// A similarity search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: Uuid,
    pub score: f32,
    pub payload: PointPayload,
}

/// A retrieved record keyed by the point that stores it.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub point_id: Uuid,
    pub score: f32,
    pub record: Record,
}

/// Parameters of a two-step neighbour fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFilters {
    /// Collection to search
    pub collection: String,
    /// `mail_id` of the reference record
    pub id: String,
    /// Maximum number of candidates
    pub count: u64,
}

impl FetchFilters {
    pub fn new(collection: impl Into<String>, id: impl Into<String>, count: u64) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            count,
        }
    }
}
