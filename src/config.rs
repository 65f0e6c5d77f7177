//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;

use crate::cache::StorageMode;

/// Cache layer configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Byte budget for the heap backend
    pub heap_max_bytes: u64,
    /// Connection URL for the relational backend
    pub sql_url: String,
    /// Maximum number of rows the relational backend may hold
    pub sql_max_entries: u64,
    /// Storage mode for the document backend
    pub document_mode: StorageMode,
    /// Background prune task interval in seconds
    pub prune_interval: u64,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `HEAP_MAX_BYTES` - Heap backend byte budget (default: 16 MiB)
    /// - `SQL_URL` - Relational backend URL (default: "sqlite::memory:")
    /// - `SQL_MAX_ENTRIES` - Relational backend row cap (default: 10000)
    /// - `DOCUMENT_MODE` - "detailed" or "binary" (default: detailed)
    /// - `PRUNE_INTERVAL` - Prune frequency in seconds (default: 60)
    pub fn from_env() -> Self {
        Self {
            heap_max_bytes: env::var("HEAP_MAX_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(16 * 1024 * 1024),
            sql_url: env::var("SQL_URL").unwrap_or_else(|_| "sqlite::memory:".to_string()),
            sql_max_entries: env::var("SQL_MAX_ENTRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            document_mode: match env::var("DOCUMENT_MODE").ok().as_deref() {
                Some("binary") => StorageMode::Binary,
                _ => StorageMode::Detailed,
            },
            prune_interval: env::var("PRUNE_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            heap_max_bytes: 16 * 1024 * 1024,
            sql_url: "sqlite::memory:".to_string(),
            sql_max_entries: 10_000,
            document_mode: StorageMode::Detailed,
            prune_interval: 60,
        }
    }
}
