//! HealPlus Storage - cached collection reads and live subscriptions.
//!
//! Readers go through a shared [`CollectionCache`]; live subscriptions keep
//! it current by writing every pushed snapshot under the collection path.
//! The remote store is abstracted by [`DocumentStore`] with an HTTP/WebSocket
//! implementation ([`RestDocumentStore`]) and an in-memory one for tests and
//! local development.

pub mod cache;
pub mod live;
pub mod memory;
pub mod reader;
pub mod remote;
pub mod store;
pub mod view;

pub use cache::{CacheRead, CacheStats, CollectionCache, TtlCache, DEFAULT_STALE_TIME};
pub use live::{Subscription, SubscriptionManager};
pub use memory::InMemoryDocumentStore;
pub use reader::CollectionReader;
pub use remote::RestDocumentStore;
pub use store::{
    records_from_documents, DocumentStore, RemoteDocument, SnapshotStream, StoreError, StoreResult,
};
pub use view::{CollectionView, ViewState};
