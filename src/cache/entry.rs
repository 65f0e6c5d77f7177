//! Cache Entry Module
//!
//! Defines the immutable value object produced by a generation step: the
//! cached payload plus media metadata, timestamps, and group-invalidation
//! tags.

use std::collections::HashSet;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use serde::Serialize;

use crate::error::{CacheError, Result};

// == Payload ==
/// The cached body. Exactly one form is present; the absent form is derived
/// on demand (see [`CacheEntry::recoded`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A textual body (UTF-8)
    Text(String),
    /// A raw byte body (already encoded content)
    Bytes(Vec<u8>),
}

impl Payload {
    /// Byte length of the present form; used for capacity accounting.
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Bytes(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The body as bytes, regardless of form.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Bytes(bytes) => bytes,
        }
    }

    /// The textual form, if this payload has one.
    pub fn text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Bytes(_) => None,
        }
    }
}

// == Cache Entry ==
/// A single cached result: payload, media metadata, timestamps, and tags.
///
/// Entries are created by the caller (typically from generation output),
/// handed to `store`, and read-only thereafter; the only derivation is
/// [`recoded`](CacheEntry::recoded), which produces a new entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The cached body
    pub payload: Payload,
    /// Negotiated media type, e.g. "text/html"
    pub media_type: Option<String>,
    /// Negotiated language, e.g. "en"
    pub language: Option<String>,
    /// Character set, e.g. "utf-8"
    pub charset: Option<String>,
    /// Content encoding, e.g. "gzip"
    pub encoding: Option<String>,
    /// When the source that produced this value last changed (Unix ms).
    /// Compared against freshly loaded sources for staleness.
    pub doc_modified_ms: u64,
    /// When this cache record was written (Unix ms)
    pub entry_modified_ms: u64,
    /// Expiration (Unix ms); None = never expires by time, though the entry
    /// may still be evicted by capacity or invalidation
    pub expires_ms: Option<u64>,
    /// Group-invalidation labels; empty = untagged
    pub tags: HashSet<String>,
}

impl CacheEntry {
    // == Constructors ==
    /// Creates an entry with a text payload. Both timestamps default to now;
    /// no expiration and no tags until set via the builder methods.
    pub fn text(body: impl Into<String>) -> Self {
        Self::with_payload(Payload::Text(body.into()))
    }

    /// Creates an entry with a raw byte payload.
    pub fn bytes(body: Vec<u8>) -> Self {
        Self::with_payload(Payload::Bytes(body))
    }

    fn with_payload(payload: Payload) -> Self {
        let now = current_timestamp_ms();
        Self {
            payload,
            media_type: None,
            language: None,
            charset: None,
            encoding: None,
            doc_modified_ms: now,
            entry_modified_ms: now,
            expires_ms: None,
            tags: HashSet::new(),
        }
    }

    // == Builder Methods ==
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Sets the document-modification timestamp (when the source changed,
    /// not when this record was written).
    pub fn with_doc_modified_ms(mut self, doc_modified_ms: u64) -> Self {
        self.doc_modified_ms = doc_modified_ms;
        self
    }

    /// Sets an absolute expiration timestamp (Unix ms).
    pub fn with_expires_ms(mut self, expires_ms: u64) -> Self {
        self.expires_ms = Some(expires_ms);
        self
    }

    /// Sets the expiration to a duration from now.
    pub fn expires_after_secs(self, secs: u64) -> Self {
        let expires = current_timestamp_ms() + secs * 1000;
        self.with_expires_ms(expires)
    }

    // == Size ==
    /// Byte length of whichever payload form is present.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// Boundary condition: an entry is expired when the current time is
    /// greater than or equal to the expiration time. An expired entry must
    /// never be returned by `fetch`, even if not yet physically removed.
    pub fn is_expired(&self) -> bool {
        match self.expires_ms {
            Some(expires) => current_timestamp_ms() >= expires,
            None => false,
        }
    }

    // == Is Stale Against ==
    /// Re-validation check the caller applies before trusting a hit: if the
    /// source document has changed since this entry was cached, the hit must
    /// be treated as a miss even though the entry has not expired.
    pub fn is_stale_against(&self, source_modified_ms: u64) -> bool {
        source_modified_ms > self.doc_modified_ms
    }

    // == Recoded ==
    /// Re-encoding constructor: compresses the payload for the given content
    /// encoding and returns a new entry with a byte payload, the encoding
    /// recorded, and every other field shared. The original is never mutated.
    ///
    /// # Arguments
    /// * `encoding` - "gzip" or "deflate"
    pub fn recoded(&self, encoding: &str) -> Result<CacheEntry> {
        let failed = |e: std::io::Error| CacheError::Backend(format!("{encoding} encoding failed: {e}"));
        let compressed = match encoding {
            "gzip" => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(self.payload.as_bytes()).map_err(failed)?;
                encoder.finish().map_err(failed)?
            }
            "deflate" => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(self.payload.as_bytes()).map_err(failed)?;
                encoder.finish().map_err(failed)?
            }
            other => return Err(CacheError::UnsupportedEncoding(other.to_string())),
        };

        let mut entry = self.clone();
        entry.payload = Payload::Bytes(compressed);
        entry.encoding = Some(encoding.to_string());
        Ok(entry)
    }

    // == Representation ==
    /// Produces a protocol-neutral view of the entry for the consuming
    /// layer: body bytes, a composed content type, and wall-clock
    /// timestamps. Not itself cache logic.
    pub fn representation(&self) -> EntryRepresentation {
        let content_type = self.media_type.as_ref().map(|media| match &self.charset {
            Some(charset) => format!("{media}; charset={charset}"),
            None => media.clone(),
        });

        EntryRepresentation {
            body: self.payload.as_bytes().to_vec(),
            content_type,
            language: self.language.clone(),
            encoding: self.encoding.clone(),
            last_modified: DateTime::from_timestamp_millis(self.doc_modified_ms as i64)
                .unwrap_or_default(),
            expires: self
                .expires_ms
                .and_then(|ms| DateTime::from_timestamp_millis(ms as i64)),
        }
    }
}

// == Entry Representation ==
/// Downstream view of a cached entry, ready for whatever response type the
/// consuming protocol layer needs.
#[derive(Debug, Clone, Serialize)]
pub struct EntryRepresentation {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub language: Option<String>,
    pub encoding: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub expires: Option<DateTime<Utc>>,
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}
