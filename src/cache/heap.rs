//! Heap Cache Module
//!
//! In-process backend: a byte-bounded concurrent entry map plus a tag
//! index. Guarded by lock-free structures (concurrent maps, an atomic
//! running byte total) rather than a global lock, so the entry map and the
//! tag index are not updated in one critical section; a reader can
//! transiently see an entry without its tag association. Expiration and
//! eventual invalidation stay correct either way.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::cache::stats::StatsCounters;
use crate::cache::{Cache, CacheEntry, CacheStats};

// == Heap Cache ==
/// Size-bounded, tag-indexed, process-local cache.
#[derive(Debug)]
pub struct HeapCache {
    /// Key-value storage
    entries: DashMap<String, CacheEntry>,
    /// Tag index: tag -> keys currently carrying it
    tags: DashMap<String, HashSet<String>>,
    /// Running payload byte total
    total_bytes: AtomicU64,
    /// Byte budget
    max_bytes: u64,
    /// Performance statistics
    stats: StatsCounters,
}

impl HeapCache {
    // == Constructor ==
    /// Creates a heap cache bounded to `max_bytes` of payload.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            entries: DashMap::new(),
            tags: DashMap::new(),
            total_bytes: AtomicU64::new(0),
            max_bytes,
            stats: StatsCounters::default(),
        }
    }

    // == Store ==
    /// Replace-or-insert. The entry is inserted first and its size added to
    /// the running total; if the total then exceeds the budget, expired
    /// entries are pruned once, and if that is not enough the store is
    /// undone and dropped. A second prune-retry is deliberately not
    /// attempted, so heavy concurrent overflow can briefly exceed the
    /// budget.
    pub fn store(&self, key: &str, entry: CacheEntry) {
        let new_size = entry.size() as u64;
        let new_tags: Vec<String> = entry.tags.iter().cloned().collect();

        let replaced = self.entries.insert(key.to_string(), entry);
        self.total_bytes.fetch_add(new_size, Ordering::SeqCst);
        if let Some(old) = replaced {
            self.total_bytes.fetch_sub(old.size() as u64, Ordering::SeqCst);
            // Prior tag associations are replaced, not appended to
            self.detach_tags(key, &old.tags);
        }

        if self.total_bytes.load(Ordering::SeqCst) > self.max_bytes {
            self.prune_expired();
            if self.total_bytes.load(Ordering::SeqCst) > self.max_bytes {
                if let Some((_, rejected)) = self.entries.remove(key) {
                    self.total_bytes
                        .fetch_sub(rejected.size() as u64, Ordering::SeqCst);
                    self.detach_tags(key, &rejected.tags);
                }
                self.stats.record_rejection();
                debug!(key, "heap cache full, store dropped");
                return;
            }
        }

        for tag in new_tags {
            self.tags.entry(tag).or_default().insert(key.to_string());
        }
    }

    // == Fetch ==
    /// Point lookup with lazy eviction: an expired hit is removed and
    /// reported as a miss.
    pub fn fetch(&self, key: &str) -> Option<CacheEntry> {
        let cached = self.entries.get(key).map(|entry| entry.value().clone());
        match cached {
            Some(entry) if entry.is_expired() => {
                if self.remove_entry(key).is_some() {
                    self.stats.record_eviction();
                }
                self.stats.record_miss();
                None
            }
            Some(entry) => {
                self.stats.record_hit();
                Some(entry)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    // == Invalidate ==
    /// Removes every entry currently tagged with `tag`.
    pub fn invalidate(&self, tag: &str) {
        let Some((_, keys)) = self.tags.remove(tag) else {
            return;
        };
        for key in keys {
            if self.remove_entry(&key).is_some() {
                self.stats.record_eviction();
            }
        }
    }

    // == Prune ==
    /// Proactively removes all expired entries.
    pub fn prune(&self) {
        let removed = self.prune_expired();
        if removed > 0 {
            debug!(removed, "heap cache pruned expired entries");
        }
    }

    // == Reset ==
    /// Removes everything. The two structures are cleared one after the
    /// other, not atomically; concurrent readers may transiently observe a
    /// partially cleared cache.
    pub fn reset(&self) {
        self.entries.clear();
        self.tags.clear();
        self.total_bytes.store(0, Ordering::SeqCst);
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats
            .snapshot(self.entries.len(), self.total_bytes.load(Ordering::SeqCst))
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // == Internals ==
    fn prune_expired(&self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|item| item.value().is_expired())
            .map(|item| item.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if self.remove_entry(&key).is_some() {
                self.stats.record_eviction();
                removed += 1;
            }
        }
        removed
    }

    /// Removes one entry, subtracting its size and dropping its tag
    /// associations so the index never holds keys for absent entries.
    fn remove_entry(&self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key).map(|(_, entry)| entry)?;
        self.total_bytes
            .fetch_sub(removed.size() as u64, Ordering::SeqCst);
        self.detach_tags(key, &removed.tags);
        Some(removed)
    }

    fn detach_tags(&self, key: &str, tags: &HashSet<String>) {
        for tag in tags {
            let now_empty = self
                .tags
                .get_mut(tag)
                .map(|mut keys| {
                    keys.remove(key);
                    keys.is_empty()
                })
                .unwrap_or(false);
            if now_empty {
                self.tags.remove_if(tag, |_, keys| keys.is_empty());
            }
        }
    }
}

// == Cache Contract ==
#[async_trait]
impl Cache for HeapCache {
    async fn store(&self, key: &str, entry: CacheEntry) {
        HeapCache::store(self, key, entry);
    }

    async fn fetch(&self, key: &str) -> Option<CacheEntry> {
        HeapCache::fetch(self, key)
    }

    async fn invalidate(&self, tag: &str) {
        HeapCache::invalidate(self, tag);
    }

    async fn prune(&self) {
        HeapCache::prune(self);
    }

    async fn reset(&self) {
        HeapCache::reset(self);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::current_timestamp_ms;

    fn expired_entry(body: &str) -> CacheEntry {
        CacheEntry::text(body).with_expires_ms(current_timestamp_ms().saturating_sub(1_000))
    }

    #[test]
    fn test_new_cache_is_empty() {
        let cache = HeapCache::new(1024);
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_store_and_fetch() {
        let cache = HeapCache::new(1024);
        cache.store("k1", CacheEntry::text("value").with_media_type("text/plain"));

        let hit = cache.fetch("k1").unwrap();
        assert_eq!(hit.payload.text(), Some("value"));
        assert_eq!(hit.media_type.as_deref(), Some("text/plain"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fetch_nonexistent() {
        let cache = HeapCache::new(1024);
        assert!(cache.fetch("missing").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_overwrite_replaces_entry_and_size() {
        let cache = HeapCache::new(1024);
        cache.store("k1", CacheEntry::text("0123456789"));
        cache.store("k1", CacheEntry::text("abc"));

        assert_eq!(cache.fetch("k1").unwrap().payload.text(), Some("abc"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().total_bytes, 3);
    }

    #[test]
    fn test_expired_entry_is_lazily_evicted() {
        let cache = HeapCache::new(1024);
        cache.store("k1", expired_entry("old"));

        assert!(cache.fetch("k1").is_none());
        // The first fetch removed it physically
        assert_eq!(cache.len(), 0);
        assert!(cache.fetch("k1").is_none());
    }

    #[test]
    fn test_tag_invalidation() {
        let cache = HeapCache::new(1024);
        cache.store("k1", CacheEntry::text("a").with_tag("A"));
        cache.store("k2", CacheEntry::text("b").with_tag("A"));
        cache.store("k3", CacheEntry::text("c").with_tag("B"));

        cache.invalidate("A");

        assert!(cache.fetch("k1").is_none());
        assert!(cache.fetch("k2").is_none());
        assert!(cache.fetch("k3").is_some());
    }

    #[test]
    fn test_restore_replaces_tag_associations() {
        let cache = HeapCache::new(1024);
        cache.store("k1", CacheEntry::text("tagged").with_tag("A"));
        cache.store("k1", CacheEntry::text("untagged"));

        cache.invalidate("A");

        assert!(
            cache.fetch("k1").is_some(),
            "invalidating a tag the entry no longer carries must not remove it"
        );
    }

    #[test]
    fn test_invalidation_then_restore_leaves_no_stale_association() {
        let cache = HeapCache::new(1024);
        cache.store("k1", CacheEntry::text("v").with_tags(["A", "B"]));

        cache.invalidate("A");
        cache.store("k1", CacheEntry::text("fresh"));
        cache.invalidate("B");

        assert!(cache.fetch("k1").is_some());
    }

    #[test]
    fn test_capacity_rejection() {
        let cache = HeapCache::new(10);
        cache.store("k1", CacheEntry::text("0123456789")); // exactly at budget

        cache.store("k2", CacheEntry::text("spill"));

        assert!(cache.fetch("k2").is_none(), "overflow store is dropped");
        assert!(cache.fetch("k1").is_some(), "resident entry survives");
        assert_eq!(cache.stats().rejections, 1);
        assert_eq!(cache.stats().total_bytes, 10);
    }

    #[test]
    fn test_overflow_prunes_expired_first() {
        let cache = HeapCache::new(10);
        cache.store("k1", expired_entry("0123456789"));

        cache.store("k2", CacheEntry::text("fits"));

        assert!(cache.fetch("k2").is_some(), "pruning made room");
        assert!(cache.fetch("k1").is_none());
    }

    #[test]
    fn test_prune_removes_only_expired() {
        let cache = HeapCache::new(1024);
        cache.store("gone", expired_entry("x"));
        cache.store("kept", CacheEntry::text("y").expires_after_secs(60));

        cache.prune();

        assert_eq!(cache.len(), 1);
        assert!(cache.fetch("kept").is_some());
    }

    #[test]
    fn test_reset_clears_everything() {
        let cache = HeapCache::new(1024);
        cache.store("k1", CacheEntry::text("a").with_tag("A"));
        cache.store("k2", CacheEntry::text("b"));

        cache.reset();

        assert!(cache.is_empty());
        assert!(cache.fetch("k1").is_none());
        assert_eq!(cache.stats().total_bytes, 0);
        cache.invalidate("A"); // no panic on cleared index
    }

    #[test]
    fn test_stats_counts() {
        let cache = HeapCache::new(1024);
        cache.store("k1", CacheEntry::text("v"));
        cache.fetch("k1");
        cache.fetch("nope");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }
}
