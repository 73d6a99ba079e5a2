//! Cache of materialized dataset sub-regions.
//!
//! Each entry is a Zarr dataset holding the exact index-space extract of one
//! variable of one source. Entries are keyed by a hash of the source URI and
//! the temporal and horizontal slices ([`key`]); a request that is not an
//! exact match can still be served by a larger entry that contains it
//! ([`overlap`]). The total size of materialized entries is bounded and the
//! least recently used entries are evicted first.
//!
//! # Entry lifecycle
//!
//! ```text
//! lookup (miss) ──► PENDING ──► writer.finish + finalize ──► MATERIALIZED
//!                      ▲                                        │
//!                      └──── backing file missing / stale ◄─────┘
//!                                                               │
//!                                   reserve (LRU) / invalidate ─┴──► deleted
//! ```

pub mod catalog;
pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod overlap;
pub mod store;

pub use catalog::CacheCatalog;
pub use config::CacheConfig;
pub use entry::{CacheEntry, CacheRequest, EntryState};
pub use error::CacheError;
pub use key::{CacheKey, CacheKeyDeriver, DerivedKey};
pub use overlap::{Classification, Overlap, OverlapClassifier};
pub use store::{CacheLookup, CacheStats, CacheStore, DiskCacheStore, ReserveOutcome};
