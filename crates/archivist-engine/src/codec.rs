//! JSON document encoding for archived records.
//!
//! A document is a JSON object with `id`, `last_modified` (RFC 3339, full
//! precision) and, when present, `is_active`, followed by the record's
//! attributes in key order. Equal records always encode to equal bytes.
//!
//! On decode, every top-level key other than the reserved ones is kept as
//! an attribute, so documents written by newer producers survive a
//! round-trip through older readers.

use archivist_types::error::ArchiveError;
use archivist_types::record::Record;
use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Top-level keys owned by the document envelope.
pub const RESERVED_KEYS: [&str; 3] = ["id", "last_modified", "is_active"];

/// Encoder/decoder for archived record documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentCodec;

impl DocumentCodec {
    /// Encode a record as a JSON document.
    ///
    /// # Errors
    ///
    /// Returns a `Serialization` error if an attribute name collides with a
    /// reserved key or an attribute value cannot be encoded.
    pub fn encode(&self, record: &Record) -> Result<Bytes, ArchiveError> {
        if let Some(key) = RESERVED_KEYS
            .iter()
            .find(|key| record.attributes.contains_key(**key))
        {
            return Err(ArchiveError::serialization(
                "RESERVED_ATTRIBUTE",
                format!("record {} has an attribute named '{key}'", record.id),
            ));
        }
        serde_json::to_vec(record).map(Bytes::from).map_err(|e| {
            ArchiveError::serialization(
                "ENCODE_FAILED",
                format!("record {}: {e}", record.id),
            )
        })
    }

    /// Decode a document produced by [`DocumentCodec::encode`].
    ///
    /// # Errors
    ///
    /// Returns a `Serialization` error if the bytes are not a valid document.
    pub fn decode(&self, bytes: &[u8]) -> Result<Record, ArchiveError> {
        serde_json::from_slice(bytes)
            .map_err(|e| ArchiveError::serialization("DECODE_FAILED", e.to_string()))
    }

    /// Hex-encoded SHA-256 of an encoded document.
    #[must_use]
    pub fn content_hash(bytes: &[u8]) -> String {
        format!("{:x}", Sha256::digest(bytes))
    }
}
