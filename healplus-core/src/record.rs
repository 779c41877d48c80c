//! Collection records as seen by readers and live views.

use crate::error::RecordError;
use crate::identity::Timestamp;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the server-assigned creation timestamp field.
pub const CREATED_AT_FIELD: &str = "createdAt";

/// One document of a remote collection, merged with its id.
///
/// Serializes flat, `{ "id": .., "createdAt": .., ...fields }`, which is the
/// shape the dashboard renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub id: String,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CollectionRecord {
    pub fn new(id: impl Into<String>, created_at: Timestamp, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            created_at,
            fields,
        }
    }

    /// Merge a remote document id with its payload.
    ///
    /// The payload must carry `createdAt` as an RFC 3339 string, epoch
    /// milliseconds, or a `{ seconds, nanoseconds }` object.
    pub fn from_document(id: impl Into<String>, mut data: Map<String, Value>) -> Result<Self, RecordError> {
        let id = id.into();
        let raw = data.remove(CREATED_AT_FIELD).ok_or_else(|| RecordError {
            id: id.clone(),
            reason: "missing createdAt".to_string(),
        })?;
        let created_at = parse_timestamp(&raw).ok_or_else(|| RecordError {
            id: id.clone(),
            reason: format!("unreadable createdAt: {}", raw),
        })?;
        data.remove("id");
        Ok(Self {
            id,
            created_at,
            fields: data,
        })
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

fn parse_timestamp(raw: &Value) -> Option<Timestamp> {
    match raw {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        Value::Object(obj) => {
            let seconds = obj.get("seconds").and_then(Value::as_i64)?;
            let nanos = obj
                .get("nanoseconds")
                .or_else(|| obj.get("nanos"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            Utc.timestamp_opt(seconds, u32::try_from(nanos).ok()?).single()
        }
        _ => None,
    }
}

/// Order records newest first; ties break on id so output is deterministic.
pub fn sort_newest_first(records: &mut [CollectionRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// True when every record is at least as new as its successor.
pub fn is_newest_first(records: &[CollectionRecord]) -> bool {
    records
        .windows(2)
        .all(|pair| pair[0].created_at >= pair[1].created_at)
}
