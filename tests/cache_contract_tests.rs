//! Contract Tests for Cache Backends
//!
//! Runs the backend-neutral contract against every implementation: round
//! trip, expiration, tag invalidation, re-tagging, capacity rejection,
//! reset, chain backtracking, and concurrent same-key access.

use std::sync::Arc;

use gencache::cache::{
    current_timestamp_ms, LocalClusterMap, LocalClusterMultiMap, MemoryDocumentStore,
};
use gencache::{
    Cache, CacheEntry, ChainCache, ClusterCache, DocumentCache, HeapCache, SqlCache, StorageMode,
};

// == Helper Functions ==

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gencache=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn local_cluster() -> ClusterCache {
    ClusterCache::new(
        Arc::new(LocalClusterMap::new()),
        Arc::new(LocalClusterMultiMap::new()),
        Arc::new(LocalClusterMap::new()),
    )
}

/// Builds one instance of every backend, each behind the trait object the
/// contract is written against.
async fn all_backends() -> Vec<(&'static str, Arc<dyn Cache>)> {
    init_tracing();

    let heap: Arc<dyn Cache> = Arc::new(HeapCache::new(1024 * 1024));
    let sql: Arc<dyn Cache> = Arc::new(
        SqlCache::connect("sqlite::memory:", 10_000)
            .await
            .expect("in-memory cache database"),
    );
    let detailed: Arc<dyn Cache> = Arc::new(
        DocumentCache::new(Arc::new(MemoryDocumentStore::new()), StorageMode::Detailed)
            .await
            .expect("document cache"),
    );
    let binary: Arc<dyn Cache> = Arc::new(
        DocumentCache::new(Arc::new(MemoryDocumentStore::new()), StorageMode::Binary)
            .await
            .expect("document cache"),
    );
    let cluster: Arc<dyn Cache> = Arc::new(local_cluster());
    let chain: Arc<dyn Cache> = Arc::new(ChainCache::new(vec![
        Arc::new(HeapCache::new(1024 * 1024)),
        Arc::new(local_cluster()),
    ]));

    vec![
        ("heap", heap),
        ("sql", sql),
        ("document-detailed", detailed),
        ("document-binary", binary),
        ("cluster", cluster),
        ("chain", chain),
    ]
}

fn page_entry(body: &str) -> CacheEntry {
    CacheEntry::text(body)
        .with_media_type("text/html")
        .with_charset("utf-8")
        .with_language("en")
        .expires_after_secs(300)
}

fn expired_entry(body: &str) -> CacheEntry {
    CacheEntry::text(body).with_expires_ms(current_timestamp_ms().saturating_sub(1_000))
}

// == Round Trip ==

#[tokio::test]
async fn test_round_trip_on_every_backend() {
    for (name, cache) in all_backends().await {
        let entry = page_entry("<html>cached</html>").with_doc_modified_ms(4242);

        cache.store("page", entry.clone()).await;
        let hit = cache
            .fetch("page")
            .await
            .unwrap_or_else(|| panic!("{name}: stored entry must be fetchable"));

        assert_eq!(hit.payload, entry.payload, "{name}: payload");
        assert_eq!(hit.media_type, entry.media_type, "{name}: media type");
        assert_eq!(hit.language, entry.language, "{name}: language");
        assert_eq!(hit.charset, entry.charset, "{name}: charset");
        assert_eq!(hit.doc_modified_ms, 4242, "{name}: doc modified");
        assert_eq!(hit.expires_ms, entry.expires_ms, "{name}: expiration");
    }
}

// == Expiration ==

#[tokio::test]
async fn test_expired_entry_is_never_returned() {
    for (name, cache) in all_backends().await {
        cache.store("stale", expired_entry("old")).await;

        assert!(
            cache.fetch("stale").await.is_none(),
            "{name}: expired entry must not be returned"
        );
        assert!(
            cache.fetch("stale").await.is_none(),
            "{name}: key stays gone on the second fetch"
        );
    }
}

// == Tag Invalidation ==

#[tokio::test]
async fn test_invalidate_removes_exactly_the_tagged_group() {
    for (name, cache) in all_backends().await {
        cache.store("k1", page_entry("a").with_tag("A")).await;
        cache.store("k2", page_entry("b").with_tag("A")).await;
        cache.store("k3", page_entry("c").with_tag("B")).await;

        cache.invalidate("A").await;

        assert!(cache.fetch("k1").await.is_none(), "{name}: k1 invalidated");
        assert!(cache.fetch("k2").await.is_none(), "{name}: k2 invalidated");
        assert!(cache.fetch("k3").await.is_some(), "{name}: k3 untouched");
    }
}

#[tokio::test]
async fn test_restoring_without_a_tag_drops_the_association() {
    for (name, cache) in all_backends().await {
        cache.store("k1", page_entry("tagged").with_tag("A")).await;
        cache.store("k1", page_entry("untagged")).await;

        cache.invalidate("A").await;

        assert!(
            cache.fetch("k1").await.is_some(),
            "{name}: re-stored entry no longer carries tag A"
        );
    }
}

// == Prune ==

#[tokio::test]
async fn test_prune_keeps_live_entries() {
    for (name, cache) in all_backends().await {
        cache.store("gone", expired_entry("x")).await;
        cache.store("kept", page_entry("y")).await;

        cache.prune().await;

        assert!(cache.fetch("kept").await.is_some(), "{name}: live entry kept");
        assert!(
            cache.fetch("gone").await.is_none(),
            "{name}: expired entry unavailable after prune"
        );
    }
}

// == Reset ==

#[tokio::test]
async fn test_reset_forgets_every_key() {
    for (name, cache) in all_backends().await {
        cache.store("k1", page_entry("a")).await;
        cache.store("k2", page_entry("b").with_tag("T")).await;

        cache.reset().await;

        assert!(cache.fetch("k1").await.is_none(), "{name}: k1 gone");
        assert!(cache.fetch("k2").await.is_none(), "{name}: k2 gone");

        // The cache stays usable after a reset
        cache.store("k3", page_entry("c")).await;
        assert!(cache.fetch("k3").await.is_some(), "{name}: usable after reset");
    }
}

// == Capacity Rejection ==

#[tokio::test]
async fn test_bounded_backends_reject_overflow() {
    init_tracing();

    let heap = HeapCache::new(8);
    heap.store("k1", CacheEntry::text("12345678"));
    heap.store("k2", CacheEntry::text("x"));
    assert!(heap.fetch("k2").is_none(), "heap: overflow store dropped");
    assert!(heap.fetch("k1").is_some(), "heap: resident entry kept");

    let sql = SqlCache::connect("sqlite::memory:", 1).await.unwrap();
    sql.store("k1", page_entry("resident")).await;
    sql.store("k2", page_entry("overflow")).await;
    assert!(sql.fetch("k2").await.is_none(), "sql: overflow store dropped");
    assert!(sql.fetch("k1").await.is_some(), "sql: resident entry kept");
}

// == Chain Backtrack ==

#[tokio::test]
async fn test_chain_backtrack_promotes_across_backend_kinds() {
    init_tracing();

    let fast = Arc::new(HeapCache::new(1024 * 1024));
    let slow = Arc::new(
        SqlCache::connect("sqlite::memory:", 100)
            .await
            .expect("in-memory cache database"),
    );
    let chain = ChainCache::new(vec![fast.clone(), slow.clone()]);

    // Seed only the slow, durable tier
    Cache::store(slow.as_ref(), "page", page_entry("tiered")).await;

    assert!(chain.fetch("page").await.is_some(), "hit served from the slow tier");

    // Remove from the slow tier; the promoted copy still answers
    Cache::reset(slow.as_ref()).await;
    assert!(
        chain.fetch("page").await.is_some(),
        "backtrack promoted the entry into the fast tier"
    );
    assert!(fast.fetch("page").is_some());
}

#[tokio::test]
async fn test_chain_invalidation_reaches_promoted_cluster_hit() {
    init_tracing();

    let fast = Arc::new(HeapCache::new(1024 * 1024));
    let cluster = Arc::new(local_cluster());
    let chain = ChainCache::new(vec![fast.clone(), cluster.clone()]);

    chain.store("page", page_entry("tiered").with_tag("A")).await;

    // Force the next fetch to come out of the cluster tier and promote
    fast.reset();
    let promoted = chain.fetch("page").await.expect("hit from the cluster tier");
    assert!(promoted.tags.contains("A"), "promoted copy keeps its tags");

    chain.invalidate("A").await;

    assert!(
        chain.fetch("page").await.is_none(),
        "invalidation reaches the copy promoted into the fast tier"
    );
    assert!(fast.fetch("page").is_none());
}

#[tokio::test]
async fn test_chain_without_backtrack_does_not_promote() {
    init_tracing();

    let fast = Arc::new(HeapCache::new(1024 * 1024));
    let slow = Arc::new(HeapCache::new(1024 * 1024));
    let chain = ChainCache::new(vec![fast.clone(), slow.clone()]).without_backtrack();

    slow.store("page", page_entry("tiered"));
    assert!(chain.fetch("page").await.is_some());

    slow.reset();
    assert!(chain.fetch("page").await.is_none(), "nothing was promoted");
}

// == Concurrency ==

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_same_key_store_fetch_never_tears() {
    init_tracing();

    let cache = Arc::new(HeapCache::new(1024 * 1024));

    // Two complete entries; readers must only ever see one or the other
    let red = CacheEntry::text("red".repeat(100))
        .with_media_type("text/red")
        .with_language("rd");
    let blue = CacheEntry::text("blue".repeat(100))
        .with_media_type("text/blue")
        .with_language("bl");

    cache.store("contended", red.clone());

    let mut handles = Vec::new();
    for worker in 0..8 {
        let cache = cache.clone();
        let red = red.clone();
        let blue = blue.clone();
        handles.push(tokio::spawn(async move {
            for round in 0..500 {
                if worker % 2 == 0 {
                    let entry = if round % 2 == 0 { red.clone() } else { blue.clone() };
                    cache.store("contended", entry);
                } else if let Some(seen) = cache.fetch("contended") {
                    let matches_red = seen.payload == red.payload
                        && seen.media_type == red.media_type
                        && seen.language == red.language;
                    let matches_blue = seen.payload == blue.payload
                        && seen.media_type == blue.media_type
                        && seen.language == blue.language;
                    assert!(
                        matches_red || matches_blue,
                        "observed a torn entry: {:?} / {:?}",
                        seen.media_type,
                        seen.language
                    );
                }
            }
        }));
    }

    for handle in handles {
        handle.await.expect("worker panicked");
    }
}

// == Staleness Re-validation ==

#[tokio::test]
async fn test_caller_side_staleness_check() {
    init_tracing();

    let cache = HeapCache::new(1024);
    let entry = page_entry("v1").with_doc_modified_ms(1_000);
    cache.store("doc", entry);

    let hit = cache.fetch("doc").expect("hit");

    // Source unchanged: the hit is trustworthy
    assert!(!hit.is_stale_against(1_000));
    // Source rewritten after caching: treat as a miss and regenerate
    assert!(hit.is_stale_against(2_000));
}
