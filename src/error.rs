//! Error types for stale-cache operations.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by caches, stores, and the regeneration machinery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid cache descriptor or wiring (empty name, duplicate registration).
    ConfigError(String),

    /// The transient store failed. Always propagated to the caller.
    BackendError(String),

    /// The value factory failed inside a background regeneration.
    ///
    /// The previously stored value is left in place.
    RegenerationFailed(String),

    /// The value factory failed on a synchronous path (miss, forced fresh read, reset).
    FactoryError(String),

    /// Payload could not be encoded for storage.
    SerializationError(String),

    /// Stored payload could not be decoded.
    DeserializationError(String),

    /// Stored payload is missing the envelope header.
    InvalidCacheEntry(String),

    /// Stored payload was written by a different schema version.
    VersionMismatch { expected: u32, found: u32 },

    /// The deferred-job runner refused a job.
    ScheduleError(String),

    /// A regeneration job fired for a name with no live cache.
    NotRegistered(String),

    /// The per-key regeneration lock could not be acquired in time.
    Timeout(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigError(msg) => write!(f, "configuration error: {}", msg),
            Error::BackendError(msg) => write!(f, "backend error: {}", msg),
            Error::RegenerationFailed(msg) => write!(f, "regeneration failed: {}", msg),
            Error::FactoryError(msg) => write!(f, "value factory error: {}", msg),
            Error::SerializationError(msg) => write!(f, "serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => write!(
                f,
                "cache schema version mismatch: expected {}, found {}",
                expected, found
            ),
            Error::ScheduleError(msg) => write!(f, "schedule error: {}", msg),
            Error::NotRegistered(name) => write!(f, "no cache registered under '{}'", name),
            Error::Timeout(msg) => write!(f, "timeout: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// True for errors that mean the stored bytes are unusable rather than unreachable.
    pub fn is_corrupt_entry(&self) -> bool {
        matches!(
            self,
            Error::DeserializationError(_)
                | Error::InvalidCacheEntry(_)
                | Error::VersionMismatch { .. }
        )
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::BackendError(e.to_string())
    }
}
