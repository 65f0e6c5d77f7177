//! Relational Cache Module
//!
//! Two-table SQL backend: an entries table keyed by cache key and a tags
//! table with a cascading foreign key, indexed on tag. Same-key operations
//! are serialized by per-key striped locks ([`StripedLocks`]) above the
//! connection pool; across different keys there is no ordering guarantee.
//!
//! Runtime SQL failures are absorbed into no-op/miss and logged; only
//! [`SqlCache::connect`] is fallible, because a backend that cannot open or
//! migrate its database can never serve a later call.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, SqlitePool};
use tracing::{debug, warn};

use crate::cache::{current_timestamp_ms, Cache, CacheEntry, Payload, StripedLocks};
use crate::error::{CacheError, Result};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS cache_entries (
        key            TEXT PRIMARY KEY,
        is_text        INTEGER NOT NULL,
        payload        BLOB NOT NULL,
        media_type     TEXT,
        language       TEXT,
        charset        TEXT,
        encoding       TEXT,
        doc_modified   INTEGER NOT NULL,
        entry_modified INTEGER NOT NULL,
        expires        INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS cache_tags (
        key TEXT NOT NULL REFERENCES cache_entries(key) ON DELETE CASCADE,
        tag TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_cache_tags_tag ON cache_tags(tag)",
];

// == SQL Cache ==
/// Relational backend with a bounded row count and per-key striped locks.
///
/// The lock table grows with the key space and never shrinks on the hot
/// path (see [`StripedLocks`]); tag invalidation discards the locks of the
/// keys it deletes and reset clears the table.
pub struct SqlCache {
    pool: SqlitePool,
    locks: StripedLocks,
    max_entries: u64,
}

impl SqlCache {
    // == Constructor ==
    /// Connects to `url`, creates the schema, and returns the backend.
    ///
    /// Failure here is a configuration error and is fatal - it is never
    /// degraded to a soft failure, because no later operation could succeed.
    pub async fn connect(url: &str, max_entries: u64) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| CacheError::Configuration(format!("invalid SQL url {url:?}: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every fresh in-memory connection is an empty database, so the
        // pool must hold exactly one connection and never recycle it.
        let pool_options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| CacheError::Configuration(format!("cannot open cache database: {e}")))?;

        let cache = Self {
            pool,
            locks: StripedLocks::new(),
            max_entries,
        };
        cache
            .create_schema()
            .await
            .map_err(|e| CacheError::Configuration(format!("cannot create cache schema: {e}")))?;
        Ok(cache)
    }

    async fn create_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // == Store ==
    /// UPDATE first; on a fresh key, gate the INSERT on the row cap with a
    /// single prune-and-recheck. An at-capacity store is abandoned (the key
    /// is simply not cached this time), and tag rows are only rewritten
    /// when the entry actually landed.
    async fn try_store(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let _guard = self.locks.write(key).await;

        let is_text = entry.payload.text().is_some();
        let updated = sqlx::query(
            "UPDATE cache_entries SET is_text = ?1, payload = ?2, media_type = ?3,
             language = ?4, charset = ?5, encoding = ?6, doc_modified = ?7,
             entry_modified = ?8, expires = ?9 WHERE key = ?10",
        )
        .bind(is_text)
        .bind(entry.payload.as_bytes())
        .bind(&entry.media_type)
        .bind(&entry.language)
        .bind(&entry.charset)
        .bind(&entry.encoding)
        .bind(entry.doc_modified_ms as i64)
        .bind(entry.entry_modified_ms as i64)
        .bind(entry.expires_ms.map(|ms| ms as i64))
        .bind(key)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            if self.row_count().await? >= self.max_entries {
                self.delete_expired().await?;
                if self.row_count().await? >= self.max_entries {
                    debug!(key, "relational cache full, store dropped");
                    return Ok(());
                }
            }

            sqlx::query(
                "INSERT INTO cache_entries (key, is_text, payload, media_type, language,
                 charset, encoding, doc_modified, entry_modified, expires)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .bind(key)
            .bind(is_text)
            .bind(entry.payload.as_bytes())
            .bind(&entry.media_type)
            .bind(&entry.language)
            .bind(&entry.charset)
            .bind(&entry.encoding)
            .bind(entry.doc_modified_ms as i64)
            .bind(entry.entry_modified_ms as i64)
            .bind(entry.expires_ms.map(|ms| ms as i64))
            .execute(&self.pool)
            .await?;
        }

        // Replace, not append: the key's prior tag rows go away first
        sqlx::query("DELETE FROM cache_tags WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        for tag in &entry.tags {
            sqlx::query("INSERT INTO cache_tags (key, tag) VALUES (?1, ?2)")
                .bind(key)
                .bind(tag)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    // == Fetch ==
    async fn try_fetch(&self, key: &str) -> Result<Option<CacheEntry>> {
        let guard = self.locks.read(key).await;

        let row = sqlx::query(
            "SELECT is_text, payload, media_type, language, charset, encoding,
             doc_modified, entry_modified, expires FROM cache_entries WHERE key = ?1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires: Option<i64> = row.try_get("expires")?;
        if let Some(expires) = expires {
            if current_timestamp_ms() >= expires as u64 {
                // Read -> write hand-off: not atomic. Another fetch may see
                // the same expired row before this delete lands; both
                // report a miss and the delete is idempotent.
                drop(guard);
                let _write = self.locks.write(key).await;
                sqlx::query("DELETE FROM cache_entries WHERE key = ?1")
                    .bind(key)
                    .execute(&self.pool)
                    .await?;
                return Ok(None);
            }
        }

        let mut entry = entry_from_row(&row)?;
        let tags: Vec<String> =
            sqlx::query_scalar("SELECT tag FROM cache_tags WHERE key = ?1")
                .bind(key)
                .fetch_all(&self.pool)
                .await?;
        entry.tags = tags.into_iter().collect();
        Ok(Some(entry))
    }

    // == Invalidate ==
    /// Locks the whole affected key batch, deletes it with one statement,
    /// then discards the batch's lock entries.
    async fn try_invalidate(&self, tag: &str) -> Result<()> {
        // Key lookup runs unlocked; a store racing in after it simply
        // misses this invalidation round.
        let mut keys: Vec<String> = sqlx::query_scalar("SELECT key FROM cache_tags WHERE tag = ?1")
            .bind(tag)
            .fetch_all(&self.pool)
            .await?;
        if keys.is_empty() {
            return Ok(());
        }

        // Canonical acquisition order: sorted. Any two paths locking
        // overlapping batches take the stripes in the same order, so they
        // cannot deadlock.
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            guards.push(self.locks.write(key).await);
        }

        let mut builder = QueryBuilder::new("DELETE FROM cache_entries WHERE key IN (");
        let mut separated = builder.separated(", ");
        for key in &keys {
            separated.push_bind(key);
        }
        builder.push(")");
        builder.build().execute(&self.pool).await?;

        drop(guards);
        for key in &keys {
            self.locks.discard(key);
        }
        Ok(())
    }

    // == Prune ==
    /// One bulk delete of all rows past expiration. Lock entries are left
    /// alone, consistent with the never-shrinking lock table.
    async fn delete_expired(&self) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM cache_entries WHERE expires IS NOT NULL AND expires <= ?1")
            .bind(current_timestamp_ms() as i64)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted)
    }

    // == Reset ==
    /// Drops and recreates both tables, then clears the lock table. Not
    /// atomic with respect to concurrent callers; acceptable for an
    /// administrative operation.
    async fn try_reset(&self) -> Result<()> {
        sqlx::query("DROP TABLE IF EXISTS cache_tags")
            .execute(&self.pool)
            .await?;
        sqlx::query("DROP TABLE IF EXISTS cache_entries")
            .execute(&self.pool)
            .await?;
        self.create_schema().await?;
        self.locks.clear();
        Ok(())
    }

    async fn row_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Number of live lock stripes; grows with the key space.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<CacheEntry> {
    let is_text: bool = row.try_get("is_text")?;
    let payload_bytes: Vec<u8> = row.try_get("payload")?;
    let payload = if is_text {
        let text = String::from_utf8(payload_bytes)
            .map_err(|_| CacheError::Backend("stored text payload is not valid UTF-8".into()))?;
        Payload::Text(text)
    } else {
        Payload::Bytes(payload_bytes)
    };

    let doc_modified: i64 = row.try_get("doc_modified")?;
    let entry_modified: i64 = row.try_get("entry_modified")?;
    let expires: Option<i64> = row.try_get("expires")?;

    Ok(CacheEntry {
        payload,
        media_type: row.try_get("media_type")?,
        language: row.try_get("language")?,
        charset: row.try_get("charset")?,
        encoding: row.try_get("encoding")?,
        doc_modified_ms: doc_modified as u64,
        entry_modified_ms: entry_modified as u64,
        expires_ms: expires.map(|ms| ms as u64),
        tags: Default::default(),
    })
}

// == Cache Contract ==
#[async_trait]
impl Cache for SqlCache {
    async fn store(&self, key: &str, entry: CacheEntry) {
        if let Err(err) = self.try_store(key, &entry).await {
            warn!(key, %err, "relational cache store failed");
        }
    }

    async fn fetch(&self, key: &str) -> Option<CacheEntry> {
        match self.try_fetch(key).await {
            Ok(hit) => hit,
            Err(err) => {
                warn!(key, %err, "relational cache fetch failed");
                None
            }
        }
    }

    async fn invalidate(&self, tag: &str) {
        if let Err(err) = self.try_invalidate(tag).await {
            warn!(tag, %err, "relational cache invalidation failed");
        }
    }

    async fn prune(&self) {
        match self.delete_expired().await {
            Ok(removed) if removed > 0 => debug!(removed, "relational cache pruned expired rows"),
            Ok(_) => {}
            Err(err) => warn!(%err, "relational cache prune failed"),
        }
    }

    async fn reset(&self) {
        if let Err(err) = self.try_reset().await {
            warn!(%err, "relational cache reset failed");
        }
    }
}
