//! Chain Cache Module
//!
//! Ordered composition of caches, conceptually from fastest/least-durable
//! to slowest/most-durable. A fetch walks the tiers in order; with
//! backtrack enabled (the default) a hit found in a slower tier is written
//! back into every faster tier before being returned, so the next fetch
//! stops earlier.
//!
//! Store, invalidate, prune, and reset fan out to every tier
//! unconditionally. Nothing makes these composite operations atomic across
//! children; atomicity stays per call, per backend.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::{Cache, CacheEntry};

// == Chain Cache ==
/// Tiered cache over an ordered list of children.
pub struct ChainCache {
    tiers: Vec<Arc<dyn Cache>>,
    backtrack: bool,
}

impl ChainCache {
    // == Constructor ==
    /// Creates a chain over `tiers`, fastest first, with backtrack enabled.
    pub fn new(tiers: Vec<Arc<dyn Cache>>) -> Self {
        Self {
            tiers,
            backtrack: true,
        }
    }

    /// Disables hit promotion into faster tiers.
    pub fn without_backtrack(mut self) -> Self {
        self.backtrack = false;
        self
    }

    /// Number of tiers in the chain.
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

// == Cache Contract ==
#[async_trait]
impl Cache for ChainCache {
    async fn store(&self, key: &str, entry: CacheEntry) {
        for tier in &self.tiers {
            tier.store(key, entry.clone()).await;
        }
    }

    async fn fetch(&self, key: &str) -> Option<CacheEntry> {
        for (index, tier) in self.tiers.iter().enumerate() {
            if let Some(entry) = tier.fetch(key).await {
                if self.backtrack {
                    // Promote the hit into every faster tier first
                    for faster in &self.tiers[..index] {
                        faster.store(key, entry.clone()).await;
                    }
                }
                return Some(entry);
            }
        }
        None
    }

    async fn invalidate(&self, tag: &str) {
        for tier in &self.tiers {
            tier.invalidate(tag).await;
        }
    }

    async fn prune(&self) {
        for tier in &self.tiers {
            tier.prune().await;
        }
    }

    async fn reset(&self) {
        for tier in &self.tiers {
            tier.reset().await;
        }
    }
}
