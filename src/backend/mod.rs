//! Transient store backends.
//!
//! A [`TransientStore`] is a key-value store with per-entry expiry
//! metadata. Unlike a plain TTL cache it must keep returning an entry
//! after its TTL has elapsed, reporting it as expired, until the entry is
//! replaced or deleted. That is what lets a stale cache serve the last
//! known value while a regeneration is pending.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;

#[cfg(feature = "inmemory")]
mod inmemory;
#[cfg(feature = "inmemory")]
pub use inmemory::InMemoryStore;

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use self::redis::{RedisConfig, RedisStore};

/// A stored payload and its remaining lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHit {
    pub value: Vec<u8>,
    pub remaining_ttl: Duration,
}

impl StoreHit {
    pub fn new(value: Vec<u8>, remaining_ttl: Duration) -> Self {
        StoreHit {
            value,
            remaining_ttl,
        }
    }

    /// An entry is expired once no lifetime remains.
    pub fn is_expired(&self) -> bool {
        self.remaining_ttl.is_zero()
    }
}

/// Key-value store with per-entry expiry, as supplied by the host.
///
/// Names passed in are cache names; implementations map them onto
/// storage rows via [`StorageKeys`](crate::key::StorageKeys).
pub trait TransientStore: Clone + Send + Sync + 'static {
    /// Fetch an entry, expired or not. `None` means absent.
    fn get(&self, name: &str) -> impl Future<Output = Result<Option<StoreHit>>> + Send;

    /// Store (or replace) an entry. A zero TTL expires immediately.
    fn set(
        &self,
        name: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove an entry's payload and expiry.
    fn delete(&self, name: &str) -> impl Future<Output = Result<()>> + Send;

    /// Remove every row, of either convention, whose cache name starts with
    /// `prefix`. Returns the number of rows removed.
    fn delete_by_prefix(&self, prefix: &str) -> impl Future<Output = Result<usize>> + Send;

    /// Remove every row this subsystem could have created.
    /// Returns the number of rows removed.
    fn delete_all(&self) -> impl Future<Output = Result<usize>> + Send;
}
