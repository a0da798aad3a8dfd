//! Versioned envelope for stored payloads.
//!
//! Every payload written to a [`TransientStore`](crate::TransientStore) is
//! wrapped as `[MAGIC][VERSION][POSTCARD PAYLOAD]`. Bumping
//! [`SCHEMA_VERSION`] makes entries written by older builds read as
//! corrupt, which the read path treats as absent.

use crate::error::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Envelope magic header.
pub const CACHE_MAGIC: [u8; 4] = *b"SWRC";

/// Current payload schema version.
pub const SCHEMA_VERSION: u32 = 1;

const HEADER_LEN: usize = 8;

/// Encode `value` inside a versioned envelope.
pub fn serialize_for_cache<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload = postcard::to_allocvec(value)
        .map_err(|e| Error::SerializationError(e.to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&CACHE_MAGIC);
    bytes.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decode a value from a versioned envelope.
pub fn deserialize_from_cache<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::InvalidCacheEntry(format!(
            "envelope too short: {} bytes",
            bytes.len()
        )));
    }

    let (header, payload) = bytes.split_at(HEADER_LEN);
    if header[..4] != CACHE_MAGIC {
        return Err(Error::InvalidCacheEntry("bad magic header".to_string()));
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&header[4..]);
    let found = u32::from_le_bytes(version);
    if found != SCHEMA_VERSION {
        return Err(Error::VersionMismatch {
            expected: SCHEMA_VERSION,
            found,
        });
    }

    postcard::from_bytes(payload).map_err(|e| Error::DeserializationError(e.to_string()))
}
