//! In-memory TTL cache for collection reads.
//!
//! Entries are keyed by logical query ([`CacheKey`](healplus_core::CacheKey))
//! and stamped with the time they were stored. Staleness is decided by the
//! caller on every read: there is no background expiry and nothing is removed
//! just because it aged out.
//!
//! # Example
//!
//! ```ignore
//! let cache: CollectionCache = TtlCache::new();
//! cache.set("users/u1/reports", records);
//!
//! // Caller states how old is still acceptable
//! if let Some(records) = cache.get("users/u1/reports", Duration::from_secs(300)) {
//!     render(records);
//! }
//! ```

pub mod freshness;
pub mod stats;
pub mod ttl;

pub use freshness::CacheRead;
pub use stats::CacheStats;
pub use ttl::{CollectionCache, TtlCache, DEFAULT_STALE_TIME};
