//! Distributed-Map Cache Module
//!
//! Backend over three cluster-wide structures: an entry map (key -> entry
//! in its wire form), a tag multimap (tag -> keys), and a key-tags map
//! (key -> the tag set it currently carries). The wire form itself stays
//! tagless; the key-tags map is what lets a re-store replace the key's
//! prior associations and a fetch reattach tags to the decoded entry.
//!
//! The writes a store performs are independent cluster operations with no
//! cross-operation atomicity: a crash between them leaves a dangling or
//! missing tag association, which is acceptable because the entry on its
//! own is still correctly expiration-governed.
//!
//! `prune` is an explicit no-op for this backend - a full-map scan over a
//! cluster costs more than it saves, so expiration is enforced only lazily
//! at fetch time.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::cache::{codec, Cache, CacheEntry};
use crate::error::{CacheError, Result};

// == Cluster Map Contracts ==
/// Cluster-wide key/value map holding opaque byte values.
#[async_trait]
pub trait ClusterMap: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// Cluster-wide multimap from tag to the keys carrying it.
#[async_trait]
pub trait ClusterMultiMap: Send + Sync {
    async fn put(&self, tag: &str, key: &str) -> Result<()>;

    /// Removes one key from `tag`'s set; an absent pair is not an error.
    async fn remove(&self, tag: &str, key: &str) -> Result<()>;

    /// Removes and returns every key registered under `tag`.
    async fn remove_all(&self, tag: &str) -> Result<Vec<String>>;

    async fn clear(&self) -> Result<()>;
}

// == Cluster Cache ==
/// Cache backend over a cluster entry map, tag multimap, and key-tags map.
pub struct ClusterCache {
    entries: Arc<dyn ClusterMap>,
    tags: Arc<dyn ClusterMultiMap>,
    key_tags: Arc<dyn ClusterMap>,
}

impl ClusterCache {
    // == Constructor ==
    pub fn new(
        entries: Arc<dyn ClusterMap>,
        tags: Arc<dyn ClusterMultiMap>,
        key_tags: Arc<dyn ClusterMap>,
    ) -> Self {
        Self {
            entries,
            tags,
            key_tags,
        }
    }

    async fn try_store(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        // Replace, not append: the key's prior associations go away first
        self.detach(key).await?;

        self.entries.put(key, codec::encode_entry(entry)).await?;
        // Independent cluster writes follow; see module docs for the
        // crash-between-them consequence
        for tag in &entry.tags {
            self.tags.put(tag, key).await?;
        }
        if !entry.tags.is_empty() {
            self.key_tags.put(key, encode_tags(&entry.tags)?).await?;
        }
        Ok(())
    }

    async fn try_fetch(&self, key: &str) -> Result<Option<CacheEntry>> {
        let Some(raw) = self.entries.get(key).await? else {
            return Ok(None);
        };

        let mut entry = match codec::decode_entry(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(key, %err, "discarding corrupt cluster cache entry");
                self.entries.remove(key).await?;
                self.detach(key).await?;
                return Ok(None);
            }
        };

        if entry.is_expired() {
            // Lazy eviction; a racing invalidation may briefly see a
            // dangling key in the multimap, which it tolerates
            self.entries.remove(key).await?;
            self.detach(key).await?;
            return Ok(None);
        }

        // The wire form is tagless; reattach from the key-tags map
        if let Some(raw_tags) = self.key_tags.get(key).await? {
            entry.tags = decode_tags(&raw_tags);
        }
        Ok(Some(entry))
    }

    async fn try_invalidate(&self, tag: &str) -> Result<()> {
        let keys = self.tags.remove_all(tag).await?;
        for key in keys {
            self.entries.remove(&key).await?;
            self.detach(&key).await?;
        }
        Ok(())
    }

    async fn try_reset(&self) -> Result<()> {
        // Three clears, not one atomic step
        self.entries.clear().await?;
        self.tags.clear().await?;
        self.key_tags.clear().await?;
        Ok(())
    }

    /// Drops the key's record from the key-tags map and removes the key
    /// from each tag set it was registered under, so the multimap never
    /// accumulates associations for re-stored or removed keys.
    async fn detach(&self, key: &str) -> Result<()> {
        let Some(raw) = self.key_tags.get(key).await? else {
            return Ok(());
        };
        for tag in decode_tags(&raw) {
            self.tags.remove(&tag, key).await?;
        }
        self.key_tags.remove(key).await?;
        Ok(())
    }
}

// == Tag Set Encoding ==
fn encode_tags(tags: &HashSet<String>) -> Result<Vec<u8>> {
    serde_json::to_vec(tags)
        .map_err(|e| CacheError::Backend(format!("cannot encode tag set: {e}")))
}

/// A corrupt tag record degrades to "untagged" rather than failing the
/// fetch; the entry itself is still intact.
fn decode_tags(raw: &[u8]) -> HashSet<String> {
    serde_json::from_slice(raw).unwrap_or_default()
}

// == Cache Contract ==
#[async_trait]
impl Cache for ClusterCache {
    async fn store(&self, key: &str, entry: CacheEntry) {
        if let Err(err) = self.try_store(key, &entry).await {
            warn!(key, %err, "cluster cache store failed");
        }
    }

    async fn fetch(&self, key: &str) -> Option<CacheEntry> {
        match self.try_fetch(key).await {
            Ok(hit) => hit,
            Err(err) => {
                warn!(key, %err, "cluster cache fetch failed");
                None
            }
        }
    }

    async fn invalidate(&self, tag: &str) {
        if let Err(err) = self.try_invalidate(tag).await {
            warn!(tag, %err, "cluster cache invalidation failed");
        }
    }

    async fn prune(&self) {
        // Deliberate no-op: scanning the whole cluster map proactively is
        // not worth it; expired entries fall out at fetch time
        debug!("cluster cache prune skipped (lazy expiration only)");
    }

    async fn reset(&self) {
        if let Err(err) = self.try_reset().await {
            warn!(%err, "cluster cache reset failed");
        }
    }
}

// == Local Implementations ==
/// Single-process [`ClusterMap`] for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct LocalClusterMap {
    map: DashMap<String, Vec<u8>>,
}

impl LocalClusterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[async_trait]
impl ClusterMap for LocalClusterMap {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.map.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map.get(key).map(|value| value.value().clone()))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.map.clear();
        Ok(())
    }
}

/// Single-process [`ClusterMultiMap`] counterpart.
#[derive(Debug, Default)]
pub struct LocalClusterMultiMap {
    map: DashMap<String, HashSet<String>>,
}

impl LocalClusterMultiMap {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterMultiMap for LocalClusterMultiMap {
    async fn put(&self, tag: &str, key: &str) -> Result<()> {
        self.map
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string());
        Ok(())
    }

    async fn remove(&self, tag: &str, key: &str) -> Result<()> {
        let now_empty = self
            .map
            .get_mut(tag)
            .map(|mut keys| {
                keys.remove(key);
                keys.is_empty()
            })
            .unwrap_or(false);
        if now_empty {
            self.map.remove_if(tag, |_, keys| keys.is_empty());
        }
        Ok(())
    }

    async fn remove_all(&self, tag: &str) -> Result<Vec<String>> {
        Ok(self
            .map
            .remove(tag)
            .map(|(_, keys)| keys.into_iter().collect())
            .unwrap_or_default())
    }

    async fn clear(&self) -> Result<()> {
        self.map.clear();
        Ok(())
    }
}
