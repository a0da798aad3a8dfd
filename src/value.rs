//! Payload trait for values held by a stale cache.

use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};

/// Trait for every value a [`StaleCache`](crate::StaleCache) can hold.
///
/// Blanket-implemented for any `Clone + Serialize + DeserializeOwned`
/// type that can cross threads, so most callers never implement it
/// by hand.
///
/// # Example
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use stale_cache::CacheValue;
///
/// #[derive(Clone, Serialize, Deserialize)]
/// pub struct Headline {
///     pub id: u64,
///     pub title: String,
/// }
///
/// let bytes = vec![Headline { id: 1, title: "hello".into() }]
///     .serialize_for_cache()
///     .unwrap();
/// let back = Vec::<Headline>::deserialize_from_cache(&bytes).unwrap();
/// assert_eq!(back[0].title, "hello");
/// ```
pub trait CacheValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Encode for storage.
    ///
    /// # Format
    ///
    /// ```text
    /// [MAGIC: 4 bytes] [VERSION: 4 bytes] [POSTCARD PAYLOAD]
    /// ```
    ///
    /// See `crate::serialization` for details.
    fn serialize_for_cache(&self) -> Result<Vec<u8>> {
        crate::serialization::serialize_for_cache(self)
    }

    /// Decode from storage, validating magic and schema version.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidCacheEntry`: Bad magic or truncated envelope
    /// - `Error::VersionMismatch`: Schema version changed
    /// - `Error::DeserializationError`: Corrupted payload
    fn deserialize_from_cache(bytes: &[u8]) -> Result<Self> {
        crate::serialization::deserialize_from_cache(bytes)
    }
}

impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}
