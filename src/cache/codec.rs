//! Entry Wire Codec
//!
//! Flat binary form of a [`CacheEntry`] for backends that persist or
//! transport entries as opaque blobs.
//!
//! Field order is fixed: byte payload (u32-BE length prefix + bytes, empty
//! when the text form is used), then text payload, media type, language,
//! charset, and encoding (each a u32-BE length-prefixed UTF-8 string where
//! the empty string encodes "absent"), then document-modification,
//! entry-modification, and expiration timestamps as u64-BE. Expiration 0
//! encodes "never expires". Tag associations are backend-internal and are
//! not part of this form.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::cache::{CacheEntry, Payload};

// == Codec Error ==
/// Failure to decode a stored entry blob.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The blob ended before the expected field
    #[error("Truncated entry blob while reading {field}")]
    Truncated { field: &'static str },

    /// A string field held invalid UTF-8
    #[error("Invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },
}

// == Encode ==
/// Serializes an entry into its flat binary form.
pub fn encode_entry(entry: &CacheEntry) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(entry.size() + 64);

    match &entry.payload {
        Payload::Bytes(bytes) => {
            put_field(&mut buf, bytes);
            put_field(&mut buf, b"");
        }
        Payload::Text(text) => {
            put_field(&mut buf, b"");
            put_field(&mut buf, text.as_bytes());
        }
    }

    put_field(&mut buf, opt_bytes(&entry.media_type));
    put_field(&mut buf, opt_bytes(&entry.language));
    put_field(&mut buf, opt_bytes(&entry.charset));
    put_field(&mut buf, opt_bytes(&entry.encoding));

    buf.put_u64(entry.doc_modified_ms);
    buf.put_u64(entry.entry_modified_ms);
    buf.put_u64(entry.expires_ms.unwrap_or(0));

    buf.to_vec()
}

// == Decode ==
/// Reconstructs an entry from its flat binary form.
///
/// A non-empty byte payload field selects the bytes form; otherwise the
/// text field (possibly empty) is authoritative. Tags decode as empty and
/// are reattached by backends that persist them separately.
pub fn decode_entry(raw: &[u8]) -> Result<CacheEntry, CodecError> {
    let mut buf = raw;

    let body = take_field(&mut buf, "payload")?;
    let text = take_string(&mut buf, "text payload")?;
    let media_type = take_optional(&mut buf, "media type")?;
    let language = take_optional(&mut buf, "language")?;
    let charset = take_optional(&mut buf, "charset")?;
    let encoding = take_optional(&mut buf, "encoding")?;

    if buf.remaining() < 24 {
        return Err(CodecError::Truncated { field: "timestamps" });
    }
    let doc_modified_ms = buf.get_u64();
    let entry_modified_ms = buf.get_u64();
    let expires_raw = buf.get_u64();

    let payload = if !body.is_empty() {
        Payload::Bytes(body)
    } else {
        Payload::Text(text)
    };

    Ok(CacheEntry {
        payload,
        media_type,
        language,
        charset,
        encoding,
        doc_modified_ms,
        entry_modified_ms,
        expires_ms: if expires_raw == 0 { None } else { Some(expires_raw) },
        tags: Default::default(),
    })
}

// == Field Helpers ==
fn opt_bytes(field: &Option<String>) -> &[u8] {
    field.as_deref().unwrap_or("").as_bytes()
}

fn put_field(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn take_field(buf: &mut &[u8], field: &'static str) -> Result<Vec<u8>, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated { field });
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(CodecError::Truncated { field });
    }
    Ok(buf.copy_to_bytes(len).to_vec())
}

fn take_string(buf: &mut &[u8], field: &'static str) -> Result<String, CodecError> {
    let bytes = take_field(buf, field)?;
    String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8 { field })
}

fn take_optional(buf: &mut &[u8], field: &'static str) -> Result<Option<String>, CodecError> {
    let value = take_string(buf, field)?;
    Ok(if value.is_empty() { None } else { Some(value) })
}
