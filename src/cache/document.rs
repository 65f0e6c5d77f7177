//! Document Cache Module
//!
//! Schema-less backend: one document per key in a dedicated collection,
//! reached through the [`DocumentStore`] trait so the backend wire protocol
//! stays a black box. Indexes on the expiration and tag fields are created
//! at construction so prune and invalidate are backend-native queries
//! rather than full scans.
//!
//! This backend must never crash the caller over a transient outage: every
//! call runs behind a [`Connectivity`] guard, network-class failures
//! degrade to no-op/miss, and the up/down transition is logged exactly
//! once each way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::warn;

use crate::cache::{codec, current_timestamp_ms, Cache, CacheEntry, Connectivity, Payload};
use crate::error::{CacheError, Result};

// == Document Filter ==
/// The delete-many predicates the cache needs from a document store.
#[derive(Debug, Clone)]
pub enum DocumentFilter {
    /// Documents whose tag array contains the tag
    Tag(String),
    /// Documents whose expiration field has passed the given instant
    ExpiredBy(u64),
    /// Every document in the collection
    All,
}

// == Document Store Contract ==
/// Minimal surface the cache requires of a document database collection.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert-or-replace by key (native upsert semantics).
    async fn upsert(&self, key: &str, doc: Value) -> Result<()>;

    /// Point lookup by key.
    async fn find(&self, key: &str) -> Result<Option<Value>>;

    /// Removes one document; absent keys are not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Removes every document matching the filter, returning the count.
    async fn remove_matching(&self, filter: DocumentFilter) -> Result<u64>;

    /// Requests a backend-native index on a document field.
    async fn ensure_index(&self, field: &str) -> Result<()>;
}

// == Storage Modes ==
/// How an entry is laid out inside its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Payload and each metadata field stored as separate document fields.
    /// Easier to inspect and debug; slightly larger.
    #[default]
    Detailed,
    /// The whole entry serialized into one opaque blob field. The
    /// expiration is duplicated outside the blob so pruning stays an
    /// indexed query instead of a deserialize-and-check scan.
    Binary,
}

// == Document Cache ==
/// Cache backend over any [`DocumentStore`].
pub struct DocumentCache {
    store: Arc<dyn DocumentStore>,
    mode: StorageMode,
    link: Connectivity,
}

impl DocumentCache {
    // == Constructor ==
    /// Wraps a document store, requesting the expiration and tag indexes.
    ///
    /// Index creation failure is fatal: the store is missing or
    /// misconfigured and no later operation could succeed against it.
    pub async fn new(store: Arc<dyn DocumentStore>, mode: StorageMode) -> Result<Self> {
        for field in ["expires", "tags"] {
            store.ensure_index(field).await.map_err(|e| {
                CacheError::Configuration(format!("document store rejected {field} index: {e}"))
            })?;
        }
        Ok(Self {
            store,
            mode,
            link: Connectivity::new("document"),
        })
    }

    /// Current link state; Down means calls are degrading to no-op/miss.
    pub fn is_up(&self) -> bool {
        self.link.is_up()
    }

    // == Document Layout ==
    fn to_document(&self, entry: &CacheEntry) -> Value {
        let tags: Vec<&String> = entry.tags.iter().collect();
        match self.mode {
            StorageMode::Binary => json!({
                "blob": BASE64.encode(codec::encode_entry(entry)),
                "expires": entry.expires_ms,
                "tags": tags,
            }),
            StorageMode::Detailed => json!({
                "text": entry.payload.text(),
                "bytes": match &entry.payload {
                    Payload::Bytes(bytes) => Some(BASE64.encode(bytes)),
                    Payload::Text(_) => None,
                },
                "media_type": entry.media_type,
                "language": entry.language,
                "charset": entry.charset,
                "encoding": entry.encoding,
                "doc_modified": entry.doc_modified_ms,
                "entry_modified": entry.entry_modified_ms,
                "expires": entry.expires_ms,
                "tags": tags,
            }),
        }
    }

    fn from_document(&self, doc: &Value) -> Result<CacheEntry> {
        let mut entry = match self.mode {
            StorageMode::Binary => {
                let blob = doc
                    .get("blob")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CacheError::Backend("document missing blob field".into()))?;
                let raw = BASE64
                    .decode(blob)
                    .map_err(|e| CacheError::Backend(format!("invalid blob base64: {e}")))?;
                codec::decode_entry(&raw)?
            }
            StorageMode::Detailed => {
                let payload = match doc.get("bytes").and_then(Value::as_str) {
                    Some(b64) => Payload::Bytes(BASE64.decode(b64).map_err(|e| {
                        CacheError::Backend(format!("invalid payload base64: {e}"))
                    })?),
                    None => Payload::Text(
                        doc.get("text")
                            .and_then(Value::as_str)
                            .ok_or_else(|| {
                                CacheError::Backend("document has neither text nor bytes".into())
                            })?
                            .to_string(),
                    ),
                };
                CacheEntry {
                    payload,
                    media_type: field_string(doc, "media_type"),
                    language: field_string(doc, "language"),
                    charset: field_string(doc, "charset"),
                    encoding: field_string(doc, "encoding"),
                    doc_modified_ms: doc
                        .get("doc_modified")
                        .and_then(Value::as_u64)
                        .unwrap_or_default(),
                    entry_modified_ms: doc
                        .get("entry_modified")
                        .and_then(Value::as_u64)
                        .unwrap_or_default(),
                    expires_ms: doc.get("expires").and_then(Value::as_u64),
                    tags: Default::default(),
                }
            }
        };

        if let Some(tags) = doc.get("tags").and_then(Value::as_array) {
            entry.tags = tags
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect();
        }
        Ok(entry)
    }

    // == Operations ==
    async fn try_fetch(&self, key: &str) -> Result<Option<CacheEntry>> {
        let Some(doc) = self.store.find(key).await? else {
            return Ok(None);
        };

        // The duplicated expiration field makes this check possible without
        // touching the payload
        if let Some(expires) = doc.get("expires").and_then(Value::as_u64) {
            if current_timestamp_ms() >= expires {
                self.store.remove(key).await?;
                return Ok(None);
            }
        }

        match self.from_document(&doc) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                // Corrupt or incompatible record: drop it so the key heals
                warn!(key, %err, "discarding corrupt document cache entry");
                self.store.remove(key).await?;
                Ok(None)
            }
        }
    }

    /// Absorbs a backend result into the soft-failure contract: a
    /// connectivity error flips the link Down and yields the fallback;
    /// any other error is logged per call. Successes flip the link back Up.
    fn absorb<T>(&self, op: &'static str, result: Result<T>, fallback: T) -> T {
        match result {
            Ok(value) => {
                self.link.restored();
                value
            }
            Err(err) if err.is_connectivity() => {
                self.link.lost(&err.to_string());
                fallback
            }
            Err(err) => {
                warn!(op, %err, "document cache operation failed");
                fallback
            }
        }
    }
}

// == Cache Contract ==
#[async_trait]
impl Cache for DocumentCache {
    async fn store(&self, key: &str, entry: CacheEntry) {
        let doc = self.to_document(&entry);
        let result = self.store.upsert(key, doc).await;
        self.absorb("store", result, ());
    }

    async fn fetch(&self, key: &str) -> Option<CacheEntry> {
        let result = self.try_fetch(key).await;
        self.absorb("fetch", result, None)
    }

    async fn invalidate(&self, tag: &str) {
        let result = self
            .store
            .remove_matching(DocumentFilter::Tag(tag.to_string()))
            .await
            .map(|_| ());
        self.absorb("invalidate", result, ());
    }

    async fn prune(&self) {
        let result = self
            .store
            .remove_matching(DocumentFilter::ExpiredBy(current_timestamp_ms()))
            .await
            .map(|_| ());
        self.absorb("prune", result, ());
    }

    async fn reset(&self) {
        let result = self.store.remove_matching(DocumentFilter::All).await.map(|_| ());
        self.absorb("reset", result, ());
    }
}

fn field_string(doc: &Value, field: &str) -> Option<String> {
    doc.get(field).and_then(Value::as_str).map(String::from)
}

// == Memory Document Store ==
/// In-process [`DocumentStore`] holding JSON documents in a concurrent map.
///
/// Serves as the default single-node store and as the outage harness: flip
/// [`set_available`](MemoryDocumentStore::set_available) to make every call
/// fail with a network-class error.
#[derive(Debug)]
pub struct MemoryDocumentStore {
    docs: DashMap<String, Value>,
    available: AtomicBool,
    indexes: Mutex<Vec<String>>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
            available: AtomicBool::new(true),
            indexes: Mutex::new(Vec::new()),
        }
    }

    /// Simulates the backend going away (false) or coming back (true).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fields an index was requested for, in request order.
    pub fn indexes(&self) -> Vec<String> {
        self.indexes.lock().map(|idx| idx.clone()).unwrap_or_default()
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable("document store offline".into()))
        }
    }

    fn matches(doc: &Value, filter: &DocumentFilter) -> bool {
        match filter {
            DocumentFilter::All => true,
            DocumentFilter::Tag(tag) => doc
                .get("tags")
                .and_then(Value::as_array)
                .map(|tags| tags.iter().any(|t| t.as_str() == Some(tag)))
                .unwrap_or(false),
            DocumentFilter::ExpiredBy(cutoff) => doc
                .get("expires")
                .and_then(Value::as_u64)
                .map(|expires| expires <= *cutoff)
                .unwrap_or(false),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn upsert(&self, key: &str, doc: Value) -> Result<()> {
        self.check()?;
        self.docs.insert(key.to_string(), doc);
        Ok(())
    }

    async fn find(&self, key: &str) -> Result<Option<Value>> {
        self.check()?;
        Ok(self.docs.get(key).map(|doc| doc.value().clone()))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check()?;
        self.docs.remove(key);
        Ok(())
    }

    async fn remove_matching(&self, filter: DocumentFilter) -> Result<u64> {
        self.check()?;
        let matched: Vec<String> = self
            .docs
            .iter()
            .filter(|item| Self::matches(item.value(), &filter))
            .map(|item| item.key().clone())
            .collect();
        let mut removed = 0;
        for key in matched {
            if self.docs.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn ensure_index(&self, field: &str) -> Result<()> {
        self.check()?;
        if let Ok(mut indexes) = self.indexes.lock() {
            if !indexes.iter().any(|f| f == field) {
                indexes.push(field.to_string());
            }
        }
        Ok(())
    }
}
