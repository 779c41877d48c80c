//! Push subscriptions that keep the cache current.
//!
//! Each subscription runs as its own tokio task. Every snapshot the store
//! pushes is written to the cache under the collection path and then handed
//! to the subscriber. After [`Subscription::cancel`] returns, neither callback
//! runs again, even for snapshots already in flight.

use crate::cache::CollectionCache;
use crate::store::{records_from_documents, DocumentStore, StoreError};
use futures_util::StreamExt;
use healplus_core::{CacheKey, CollectionRecord};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

thread_local! {
    /// Id of the subscription whose callback is running on this thread, or 0.
    static DELIVERING: Cell<u64> = const { Cell::new(0) };
}

struct DeliveryGuard;

impl DeliveryGuard {
    fn enter(id: u64) -> Self {
        DELIVERING.with(|d| d.set(id));
        Self
    }
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        DELIVERING.with(|d| d.set(0));
    }
}

struct SubscriptionState {
    id: u64,
    cancelled: AtomicBool,
    /// Set before `on_error` runs.
    failed: AtomicBool,
    /// Held for the duration of every callback.
    gate: Mutex<()>,
}

impl SubscriptionState {
    /// Run `deliver` unless the subscription was cancelled. Returns false
    /// when cancelled.
    fn deliver(&self, deliver: impl FnOnce()) -> bool {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        let _delivering = DeliveryGuard::enter(self.id);
        deliver();
        true
    }
}

/// Handle to one live subscription. Dropping it cancels the subscription.
pub struct Subscription {
    key: CacheKey,
    state: Arc<SubscriptionState>,
    task: AbortHandle,
}

impl Subscription {
    /// Stop delivery. Idempotent.
    ///
    /// Waits for a callback running on another thread to finish. Called
    /// from inside this subscription's own callback, it returns at once and
    /// no further callback runs.
    pub fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.task.abort();
        let inside_callback = DELIVERING.with(|d| d.get() == self.state.id);
        if !inside_callback {
            drop(self.state.gate.lock().unwrap_or_else(PoisonError::into_inner));
        }
        debug!(key = %self.key, "subscription cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// True once the subscription has failed or its task has stopped.
    ///
    /// Already true while `on_error` runs.
    pub fn is_finished(&self) -> bool {
        self.state.failed.load(Ordering::Acquire) || self.task.is_finished()
    }

    /// Cache key the snapshots are written under: the collection path.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Opens live subscriptions against a document store.
#[derive(Clone)]
pub struct SubscriptionManager {
    store: Arc<dyn DocumentStore>,
    cache: Arc<CollectionCache>,
    next_id: Arc<AtomicU64>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn DocumentStore>, cache: Arc<CollectionCache>) -> Self {
        Self {
            store,
            cache,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe to `path`. Must be called inside a tokio runtime.
    ///
    /// `on_update` receives every snapshot, newest first, after it has been
    /// cached under `path`. `on_error` runs at most once; the subscription
    /// is dead afterwards. A stream ended by the store is reported as
    /// [`StoreError::SubscriptionClosed`].
    pub fn subscribe<U, E>(&self, path: &str, on_update: U, on_error: E) -> Subscription
    where
        U: FnMut(Vec<CollectionRecord>) + Send + 'static,
        E: FnOnce(StoreError) + Send + 'static,
    {
        let state = Arc::new(SubscriptionState {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            cancelled: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            gate: Mutex::new(()),
        });
        let key = CacheKey::from(path);
        let task = tokio::spawn(run_subscription(
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            path.to_string(),
            Arc::clone(&state),
            on_update,
            on_error,
        ));
        debug!(key = %key, "subscription opened");
        Subscription {
            key,
            state,
            task: task.abort_handle(),
        }
    }
}

async fn run_subscription<U, E>(
    store: Arc<dyn DocumentStore>,
    cache: Arc<CollectionCache>,
    path: String,
    state: Arc<SubscriptionState>,
    on_update: U,
    on_error: E,
) where
    U: FnMut(Vec<CollectionRecord>) + Send + 'static,
    E: FnOnce(StoreError) + Send + 'static,
{
    let failure = match stream_snapshots(store, &cache, &path, &state, on_update).await {
        Some(failure) => failure,
        None => return,
    };
    warn!(path = %path, error = %failure, "subscription failed");
    state.failed.store(true, Ordering::Release);
    state.deliver(|| on_error(failure));
}

/// Deliver snapshots until the stream fails, ends or the subscription is
/// cancelled. Returns the failure to report, if any.
async fn stream_snapshots<U>(
    store: Arc<dyn DocumentStore>,
    cache: &CollectionCache,
    path: &str,
    state: &SubscriptionState,
    mut on_update: U,
) -> Option<StoreError>
where
    U: FnMut(Vec<CollectionRecord>),
{
    let mut snapshots = match store.watch_newest_first(path).await {
        Ok(snapshots) => snapshots,
        Err(err) => return Some(err),
    };

    while let Some(item) = snapshots.next().await {
        let records = match item.and_then(records_from_documents) {
            Ok(records) => records,
            Err(err) => return Some(err),
        };
        debug!(path, records = records.len(), "snapshot received");
        let delivered = state.deliver(|| {
            cache.set(path, records.clone());
            on_update(records);
        });
        if !delivered {
            return None;
        }
    }

    Some(StoreError::SubscriptionClosed {
        path: path.to_string(),
    })
}
