//! State-blob codec and content hashing.
//!
//! Host state snapshots travel as opaque strings: gzip over the JSON bytes,
//! base64-encoded. The relay checks that a blob decodes back to a JSON
//! document but never inspects what the document contains.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::io::{Read, Write};
use thiserror::Error;

/// Upper bound on the decompressed size of a state blob.
pub const MAX_DECODED_BYTES: u64 = 4 * 1024 * 1024;

/// Errors produced while decoding a state blob.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The blob string is not valid base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The decoded bytes are not a valid gzip stream.
    #[error("invalid gzip stream: {0}")]
    Gzip(#[from] std::io::Error),
    /// The decompressed bytes are not a valid JSON document.
    #[error("decompressed payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The decompressed document exceeds [`MAX_DECODED_BYTES`].
    #[error("decompressed payload exceeds {MAX_DECODED_BYTES} bytes")]
    TooLarge,
}

/// Compress a JSON document into an opaque blob string.
///
/// # Errors
///
/// Returns an error if the gzip stream cannot be written.
pub fn pack(doc: &Value) -> Result<String, BlobError> {
    let raw = serde_json::to_vec(doc)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    Ok(BASE64.encode(encoder.finish()?))
}

/// Decode a blob string back into the JSON document it carries.
///
/// # Errors
///
/// Returns an error if the blob is not base64, not gzip, too large once
/// decompressed, or does not decompress to valid JSON.
pub fn unpack(blob: &str) -> Result<Value, BlobError> {
    let compressed = BASE64.decode(blob)?;
    let mut raw = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .take(MAX_DECODED_BYTES + 1)
        .read_to_end(&mut raw)?;
    if raw.len() as u64 > MAX_DECODED_BYTES {
        return Err(BlobError::TooLarge);
    }
    Ok(serde_json::from_slice(&raw)?)
}

/// SHA-1 content hash of raw bytes, base64-encoded.
///
/// Used to deduplicate identical state blobs and route uploads.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    BASE64.encode(hasher.finalize())
}
