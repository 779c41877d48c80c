//! Document store contract.
//!
//! The store holds JSON documents grouped into collections addressed by a
//! slash-separated path (`users/{uid}/reports`). Every document carries a
//! server-assigned id and a `createdAt` creation time.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use healplus_core::{
    sort_newest_first, CollectionRecord, RecordError, RemoteError, CREATED_AT_FIELD,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// A document as the store returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl RemoteDocument {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// False until the store has stamped `createdAt`.
    pub fn has_created_at(&self) -> bool {
        self.fields
            .get(CREATED_AT_FIELD)
            .is_some_and(|value| !value.is_null())
    }
}

/// Failures of collection reads and subscriptions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    InvalidRecord(#[from] RecordError),

    /// The store ended a live subscription.
    #[error("subscription to {path} closed by the document store")]
    SubscriptionClosed { path: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Successive full snapshots of one collection, newest first.
pub type SnapshotStream = BoxStream<'static, StoreResult<Vec<RemoteDocument>>>;

/// Remote document store.
///
/// Every read is a query ordered by `createdAt` descending. Snapshots pushed
/// by [`DocumentStore::watch_newest_first`] always contain the whole
/// collection, never a delta.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// One-shot ordered query.
    async fn query_newest_first(&self, path: &str) -> StoreResult<Vec<RemoteDocument>>;

    /// A single document, `None` if it does not exist.
    async fn get_document(&self, path: &str, id: &str) -> StoreResult<Option<RemoteDocument>>;

    /// Append a document; the store assigns the id and `createdAt`.
    async fn append(&self, path: &str, fields: Map<String, Value>) -> StoreResult<String>;

    /// Open a push subscription. The first snapshot is the current contents.
    async fn watch_newest_first(&self, path: &str) -> StoreResult<SnapshotStream>;
}

/// Convert a store snapshot into records, newest first.
///
/// Documents without `createdAt` are not part of an ordered collection and
/// are left out. A `createdAt` that is present but unreadable fails the
/// whole snapshot.
pub fn records_from_documents(documents: Vec<RemoteDocument>) -> StoreResult<Vec<CollectionRecord>> {
    let mut records = Vec::with_capacity(documents.len());
    for doc in documents {
        if !doc.has_created_at() {
            warn!(id = %doc.id, "document has no createdAt, left out of ordered read");
            continue;
        }
        records.push(CollectionRecord::from_document(doc.id, doc.fields)?);
    }
    sort_newest_first(&mut records);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use healplus_core::is_newest_first;
    use serde_json::json;

    fn doc(id: &str, created_at: &str) -> RemoteDocument {
        let fields = json!({ "createdAt": created_at, "note": id });
        RemoteDocument::new(id, fields.as_object().cloned().unwrap())
    }

    #[test]
    fn test_records_from_documents_sorts() {
        let records = records_from_documents(vec![
            doc("a", "2024-01-01T00:00:00Z"),
            doc("c", "2024-03-01T00:00:00Z"),
            doc("b", "2024-02-01T00:00:00Z"),
        ])
        .unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["c", "b", "a"]);
        assert!(is_newest_first(&records));
    }

    #[test]
    fn test_missing_created_at_is_left_out() {
        let unstamped = RemoteDocument::new("x", Map::new());
        let pending = RemoteDocument::new("y", json!({"createdAt": null}).as_object().cloned().unwrap());
        let records =
            records_from_documents(vec![doc("a", "2024-01-01T00:00:00Z"), unstamped, pending]).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a"]);
    }

    #[test]
    fn test_unreadable_created_at_fails_snapshot() {
        let bad = doc("x", "last tuesday");
        let err = records_from_documents(vec![doc("a", "2024-01-01T00:00:00Z"), bad]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(RecordError { ref id, .. }) if id == "x"));
    }

    #[test]
    fn test_remote_document_fields_default() {
        let parsed: RemoteDocument = serde_json::from_str(r#"{"id":"d1"}"#).unwrap();
        assert!(parsed.fields.is_empty());
    }
}
