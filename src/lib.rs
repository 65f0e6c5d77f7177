//! Gencache - a pluggable caching layer for generated content
//!
//! Memoizes the output of expensive generation work so it is not repeated
//! per request. A generation step produces a self-describing [`CacheEntry`]
//! (payload plus media metadata, timestamps, and group tags); the cache
//! stores it under a caller-computed key and serves it until it expires or
//! is invalidated by tag.
//!
//! Interchangeable backends implement the [`Cache`] contract: an in-process
//! heap cache, a relational two-table backend, a schema-less document-store
//! backend, a distributed-map backend, and a tiered [`ChainCache`]
//! composition with hit promotion.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{
    Cache, CacheEntry, CacheStats, ChainCache, ClusterCache, DocumentCache, HeapCache, Payload,
    SqlCache, StorageMode,
};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use tasks::spawn_prune_task;
