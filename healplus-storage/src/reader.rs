//! Cache-first collection reads.

use crate::cache::{CacheRead, CollectionCache, DEFAULT_STALE_TIME};
use crate::store::{records_from_documents, DocumentStore, StoreResult};
use healplus_core::{CollectionRecord, CREATED_AT_FIELD};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Reads whole collections through the shared [`CollectionCache`].
///
/// A read under a fresh key never touches the store. Failed reads are not
/// cached, so the next read tries the store again.
#[derive(Clone)]
pub struct CollectionReader {
    store: Arc<dyn DocumentStore>,
    cache: Arc<CollectionCache>,
    stale_time: Duration,
}

impl CollectionReader {
    pub fn new(store: Arc<dyn DocumentStore>, cache: Arc<CollectionCache>) -> Self {
        Self {
            store,
            cache,
            stale_time: DEFAULT_STALE_TIME,
        }
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    /// Records of `path`, newest first.
    ///
    /// Cached under `cache_key` when given, otherwise under `path`.
    pub async fn read(&self, path: &str, cache_key: Option<&str>) -> StoreResult<Vec<CollectionRecord>> {
        self.read_tracked(path, cache_key, self.stale_time)
            .await
            .map(CacheRead::into_value)
    }

    /// Like [`CollectionReader::read`] with an explicit staleness tolerance,
    /// reporting whether the cache answered.
    pub async fn read_tracked(
        &self,
        path: &str,
        cache_key: Option<&str>,
        stale_time: Duration,
    ) -> StoreResult<CacheRead<Vec<CollectionRecord>>> {
        let key = cache_key.unwrap_or(path);
        if let Some(hit) = self.cache.get_read(key, stale_time) {
            debug!(path, key, records = hit.value().len(), "collection served from cache");
            return Ok(hit);
        }

        let documents = self.store.query_newest_first(path).await?;
        let records = records_from_documents(documents)?;
        let fetched_at = self.cache.now();
        self.cache.set(key, records.clone());
        debug!(path, key, records = records.len(), "collection fetched from store");
        Ok(CacheRead::from_store(records, fetched_at))
    }

    /// Append a document and drop the cached snapshots it makes outdated.
    ///
    /// Both `cache_key` (if any) and the collection path are invalidated,
    /// since live subscriptions cache under the path.
    pub async fn add_document(
        &self,
        path: &str,
        cache_key: Option<&str>,
        mut fields: Map<String, Value>,
    ) -> StoreResult<String> {
        fields.remove(CREATED_AT_FIELD);
        let id = self.store.append(path, fields).await?;
        if let Some(key) = cache_key {
            self.cache.invalidate(key);
        }
        self.cache.invalidate(path);
        debug!(path, id = %id, "document appended");
        Ok(id)
    }

    /// One document, bypassing the cache.
    pub async fn get_document(&self, path: &str, id: &str) -> StoreResult<Option<CollectionRecord>> {
        match self.store.get_document(path, id).await? {
            Some(doc) => Ok(Some(CollectionRecord::from_document(doc.id, doc.fields)?)),
            None => Ok(None),
        }
    }

    pub fn cache(&self) -> &Arc<CollectionCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn stale_time(&self) -> Duration {
        self.stale_time
    }
}
