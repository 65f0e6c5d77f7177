//! Cache Module
//!
//! The backend-neutral cache contract and its interchangeable implementations.

mod chain;
mod cluster;
mod codec;
mod connectivity;
mod document;
mod entry;
mod heap;
mod locks;
mod sql;
mod stats;


// Re-export public types
pub use chain::ChainCache;
pub use cluster::{ClusterCache, ClusterMap, ClusterMultiMap, LocalClusterMap, LocalClusterMultiMap};
pub use codec::{decode_entry, encode_entry, CodecError};
pub use connectivity::{Connectivity, LinkState};
pub use document::{
    DocumentCache, DocumentFilter, DocumentStore, MemoryDocumentStore, StorageMode,
};
pub use entry::{current_timestamp_ms, CacheEntry, EntryRepresentation, Payload};
pub use heap::HeapCache;
pub use locks::StripedLocks;
pub use sql::SqlCache;
pub use stats::CacheStats;

use async_trait::async_trait;

// == Cache Contract ==
/// The storage contract every backend implements.
///
/// All implementations are safe for unsynchronized concurrent use from
/// multiple callers. Atomicity is promised only within a single call on a
/// single backend: nothing here coordinates across the five operations, and
/// composite backends ([`ChainCache`]) and cluster-backed backends make no
/// cross-child or cross-structure atomicity guarantee.
///
/// Runtime backend failures are absorbed below this trait: the affected
/// call becomes a no-op or a miss and is logged. Callers never see
/// backend-specific errors.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Replace-or-insert under `key`. Tag associations are taken from the
    /// entry and replace any the key had before. A full backend may drop
    /// the store silently ("did not cache" is not an error).
    async fn store(&self, key: &str, entry: CacheEntry);

    /// Point lookup. Never returns an expired entry; an expired hit is
    /// removed lazily and reported as a miss.
    async fn fetch(&self, key: &str) -> Option<CacheEntry>;

    /// Removes every entry currently tagged with `tag`.
    async fn invalidate(&self, tag: &str);

    /// Proactively removes all entries whose expiration has passed.
    async fn prune(&self);

    /// Removes everything.
    async fn reset(&self);
}
