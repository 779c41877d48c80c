//! Observable view of one collection.
//!
//! A [`CollectionView`] combines a cache-first read with an optional live
//! subscription and publishes the result as a [`ViewState`] over a
//! `tokio::sync::watch` channel, which is what dashboards render from.

use crate::live::{Subscription, SubscriptionManager};
use crate::reader::CollectionReader;
use crate::store::{StoreError, StoreResult};
use healplus_core::{CacheKey, CollectionRecord};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::debug;

/// What a collection view currently shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    /// Newest first.
    pub records: Vec<CollectionRecord>,
    pub loading: bool,
    /// Last failure; cleared by the next successful read or snapshot.
    pub error: Option<StoreError>,
}

pub struct CollectionView {
    path: String,
    cache_key: Option<CacheKey>,
    reader: CollectionReader,
    live: SubscriptionManager,
    state: Arc<watch::Sender<ViewState>>,
    /// Bumped on every pushed snapshot.
    live_generation: Arc<AtomicU64>,
    subscription: Mutex<Option<Subscription>>,
}

impl CollectionView {
    pub fn new(
        path: impl Into<String>,
        cache_key: Option<&str>,
        reader: CollectionReader,
        live: SubscriptionManager,
    ) -> Self {
        let (state, _) = watch::channel(ViewState::default());
        Self {
            path: path.into(),
            cache_key: cache_key.map(CacheKey::from),
            reader,
            live,
            state: Arc::new(state),
            live_generation: Arc::new(AtomicU64::new(0)),
            subscription: Mutex::new(None),
        }
    }

    /// Anamnesis records of one patient, cached as `anamnesis-{user_id}`.
    pub async fn anamnesis_records(
        user_id: &str,
        reader: CollectionReader,
        live: SubscriptionManager,
    ) -> StoreResult<Self> {
        let key = format!("anamnesis-{}", user_id);
        let view = Self::new(format!("users/{}/anamnesis", user_id), Some(&key), reader, live);
        view.open(true).await?;
        Ok(view)
    }

    /// Assessment reports of one patient, cached as `reports-{user_id}`.
    pub async fn reports(
        user_id: &str,
        reader: CollectionReader,
        live: SubscriptionManager,
    ) -> StoreResult<Self> {
        let key = format!("reports-{}", user_id);
        let view = Self::new(format!("users/{}/reports", user_id), Some(&key), reader, live);
        view.open(true).await?;
        Ok(view)
    }

    /// Initial read, then optionally go live.
    ///
    /// A failed read still enables realtime: the first pushed snapshot
    /// replaces the error.
    pub async fn open(&self, realtime: bool) -> StoreResult<()> {
        let read = self.refetch().await;
        if realtime {
            self.enable_realtime();
        }
        read
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn cache_key(&self) -> Option<&CacheKey> {
        self.cache_key.as_ref()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ViewState {
        self.state.borrow().clone()
    }

    /// Read through the cache and publish the result.
    ///
    /// If a live snapshot arrives while the read is in flight, the read
    /// result is discarded in favor of the snapshot.
    pub async fn refetch(&self) -> StoreResult<()> {
        let generation = self.live_generation.load(Ordering::Acquire);
        self.state.send_modify(|s| s.loading = true);

        let result = self
            .reader
            .read(&self.path, self.cache_key.as_ref().map(CacheKey::as_str))
            .await;
        let superseded = self.live_generation.load(Ordering::Acquire) != generation;

        match result {
            Ok(records) => {
                self.state.send_modify(|s| {
                    if !superseded {
                        s.records = records;
                        s.error = None;
                    }
                    s.loading = false;
                });
                Ok(())
            }
            Err(err) => {
                debug!(path = %self.path, error = %err, "collection read failed");
                self.state.send_modify(|s| {
                    if !superseded {
                        s.error = Some(err.clone());
                    }
                    s.loading = false;
                });
                Err(err)
            }
        }
    }

    /// Start pushing store snapshots into the view. Replaces any previous
    /// subscription of this view.
    pub fn enable_realtime(&self) {
        let on_update = {
            let state = Arc::clone(&self.state);
            let generation = Arc::clone(&self.live_generation);
            move |records: Vec<CollectionRecord>| {
                generation.fetch_add(1, Ordering::AcqRel);
                state.send_modify(|s| {
                    s.records = records;
                    s.loading = false;
                    s.error = None;
                });
            }
        };
        let on_error = {
            let state = Arc::clone(&self.state);
            move |err: StoreError| {
                state.send_modify(|s| {
                    s.error = Some(err);
                    s.loading = false;
                });
            }
        };
        let subscription = self.live.subscribe(&self.path, on_update, on_error);
        let previous = self.lock_subscription().replace(subscription);
        drop(previous);
    }

    /// Cancel the live subscription, if any.
    pub fn disable_realtime(&self) {
        if let Some(subscription) = self.lock_subscription().take() {
            subscription.cancel();
        }
    }

    pub fn is_realtime(&self) -> bool {
        self.lock_subscription()
            .as_ref()
            .map(|sub| !sub.is_cancelled() && !sub.is_finished())
            .unwrap_or(false)
    }

    /// Append to the collection and invalidate this view's cache entries.
    pub async fn add_document(&self, fields: Map<String, Value>) -> StoreResult<String> {
        self.reader
            .add_document(&self.path, self.cache_key.as_ref().map(CacheKey::as_str), fields)
            .await
    }

    pub async fn get_document(&self, id: &str) -> StoreResult<Option<CollectionRecord>> {
        self.reader.get_document(&self.path, id).await
    }

    fn lock_subscription(&self) -> std::sync::MutexGuard<'_, Option<Subscription>> {
        self.subscription.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
