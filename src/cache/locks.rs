//! Striped Key Locks
//!
//! Lazily populated per-key read/write locks used by the relational backend
//! to serialize same-key operations above the connection pool.
//!
//! Lock entries are created on first use and never removed on the hot path:
//! most applications reuse a bounded key space, and lock-lifecycle
//! bookkeeping would cost more than the table. The table shrinks only via
//! [`discard`](StripedLocks::discard) (tag invalidation drops the locks of
//! the keys it deleted) and [`clear`](StripedLocks::clear) (reset).

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

// == Striped Locks ==
#[derive(Debug, Default)]
pub struct StripedLocks {
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl StripedLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    fn stripe(&self, key: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(key.to_string())
            .or_default()
            .value()
            .clone()
    }

    // == Read ==
    /// Acquires the shared lock for `key`, creating the stripe on first use.
    pub async fn read(&self, key: &str) -> OwnedRwLockReadGuard<()> {
        self.stripe(key).read_owned().await
    }

    // == Write ==
    /// Acquires the exclusive lock for `key`, creating the stripe on first use.
    pub async fn write(&self, key: &str) -> OwnedRwLockWriteGuard<()> {
        self.stripe(key).write_owned().await
    }

    // == Discard ==
    /// Drops the stripe for `key`. Callers that still hold the old `Arc`
    /// keep their guard; the next acquisition creates a fresh stripe.
    pub fn discard(&self, key: &str) {
        self.locks.remove(key);
    }

    // == Clear ==
    /// Drops every stripe. Only used by administrative reset.
    pub fn clear(&self) {
        self.locks.clear();
    }

    /// Returns the number of live stripes.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
