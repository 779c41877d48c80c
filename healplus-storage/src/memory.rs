//! In-memory document store for development and tests.

use crate::store::{DocumentStore, RemoteDocument, SnapshotStream, StoreError, StoreResult};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use healplus_core::{Clock, SystemClock, Timestamp, CREATED_AT_FIELD};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

type SnapshotSender = mpsc::UnboundedSender<StoreResult<Vec<RemoteDocument>>>;

#[derive(Default)]
struct Collections {
    documents: HashMap<String, Vec<(Timestamp, RemoteDocument)>>,
    watchers: HashMap<String, Vec<SnapshotSender>>,
    next_id: u64,
}

impl Collections {
    fn snapshot(&self, path: &str) -> Vec<RemoteDocument> {
        let mut docs = self.documents.get(path).cloned().unwrap_or_default();
        docs.sort_by(|(a_at, a), (b_at, b)| b_at.cmp(a_at).then_with(|| a.id.cmp(&b.id)));
        docs.into_iter().map(|(_, doc)| doc).collect()
    }

    /// Push `item` to every watcher of `path`, dropping closed ones.
    fn notify(&mut self, path: &str, item: StoreResult<Vec<RemoteDocument>>) {
        if let Some(senders) = self.watchers.get_mut(path) {
            senders.retain(|tx| tx.send(item.clone()).is_ok());
        }
    }

    fn notify_snapshot(&mut self, path: &str) {
        let snapshot = self.snapshot(path);
        self.notify(path, Ok(snapshot));
    }
}

/// Collections kept in process memory.
///
/// Appends stamp `createdAt` from the injected clock and push a fresh
/// snapshot to every open watch on the collection.
#[derive(Clone)]
pub struct InMemoryDocumentStore {
    inner: Arc<Mutex<Collections>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Collections::default())),
            clock,
        }
    }

    /// Seed a document with an explicit id and creation time.
    pub fn insert(&self, path: &str, id: &str, created_at: Timestamp, mut fields: Map<String, Value>) {
        fields.insert(CREATED_AT_FIELD.to_string(), Value::String(created_at.to_rfc3339()));
        let mut inner = self.lock();
        let docs = inner.documents.entry(path.to_string()).or_default();
        docs.retain(|(_, doc)| doc.id != id);
        docs.push((created_at, RemoteDocument::new(id, fields)));
        inner.notify_snapshot(path);
    }

    /// Store a raw document without touching its fields.
    pub fn insert_raw(&self, path: &str, document: RemoteDocument) {
        let mut inner = self.lock();
        let created_at = self.clock.now();
        inner
            .documents
            .entry(path.to_string())
            .or_default()
            .push((created_at, document));
        inner.notify_snapshot(path);
    }

    /// Deliver an error to every open watch on `path`.
    pub fn fail_watchers(&self, path: &str, error: StoreError) {
        self.lock().notify(path, Err(error));
    }

    /// End every open watch on `path`.
    pub fn close_watchers(&self, path: &str) {
        self.lock().watchers.remove(path);
    }

    /// Number of open watches on `path`.
    pub fn watcher_count(&self, path: &str) -> usize {
        let mut inner = self.lock();
        match inner.watchers.get_mut(path) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.len()
            }
            None => 0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn query_newest_first(&self, path: &str) -> StoreResult<Vec<RemoteDocument>> {
        Ok(self.lock().snapshot(path))
    }

    async fn get_document(&self, path: &str, id: &str) -> StoreResult<Option<RemoteDocument>> {
        let inner = self.lock();
        Ok(inner
            .documents
            .get(path)
            .and_then(|docs| docs.iter().find(|(_, doc)| doc.id == id))
            .map(|(_, doc)| doc.clone()))
    }

    async fn append(&self, path: &str, mut fields: Map<String, Value>) -> StoreResult<String> {
        let created_at = self.clock.now();
        fields.insert(CREATED_AT_FIELD.to_string(), Value::String(created_at.to_rfc3339()));
        fields.remove("id");

        let mut inner = self.lock();
        inner.next_id += 1;
        let id = format!("doc-{:06}", inner.next_id);
        inner
            .documents
            .entry(path.to_string())
            .or_default()
            .push((created_at, RemoteDocument::new(id.clone(), fields)));
        inner.notify_snapshot(path);
        Ok(id)
    }

    async fn watch_newest_first(&self, path: &str) -> StoreResult<SnapshotStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.lock();
            let initial = inner.snapshot(path);
            // Receiver is alive, cannot fail.
            let _ = tx.send(Ok(initial));
            inner.watchers.entry(path.to_string()).or_default().push(tx);
        }
        let snapshots = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(snapshots.boxed())
    }
}
