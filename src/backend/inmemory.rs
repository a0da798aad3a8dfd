//! In-memory transient store backed by a concurrent row table.

use super::{StoreHit, TransientStore};
use crate::error::Result;
use crate::key::StorageKeys;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// Stand-in expiry for TTLs too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
enum Row {
    Value(Vec<u8>),
    Timeout(Instant),
    Other(Vec<u8>),
}

/// In-memory [`TransientStore`] for tests, demos and single-process use.
///
/// Entries are held as named rows, a payload row plus an expiry row per
/// cache, so prefix purges behave like they would against a shared table.
/// Expiry uses tokio's clock, which lets tests drive time with
/// `tokio::time::advance`.
///
/// # Example
///
/// ```
/// # use stale_cache::backend::{InMemoryStore, TransientStore};
/// # use std::time::Duration;
/// # async fn example() -> stale_cache::Result<()> {
/// let store = InMemoryStore::new();
/// store.set("feed", b"value".to_vec(), Duration::from_secs(60)).await?;
/// let hit = store.get("feed").await?.expect("present");
/// assert!(!hit.is_expired());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryStore {
    rows: Arc<DashMap<String, Row>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row unrelated to any cache, as other tenants of a shared
    /// table would.
    pub fn insert_raw(&self, row: &str, value: Vec<u8>) {
        self.rows.insert(row.to_string(), Row::Other(value));
    }

    /// Whether a row with this exact storage name exists.
    pub fn contains_row(&self, row: &str) -> bool {
        self.rows.contains_key(row)
    }

    /// Number of rows held, of any kind.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl TransientStore for InMemoryStore {
    async fn get(&self, name: &str) -> Result<Option<StoreHit>> {
        let value = match self.rows.get(&StorageKeys::value_row(name)) {
            Some(row) => match row.value() {
                Row::Value(bytes) | Row::Other(bytes) => bytes.clone(),
                Row::Timeout(_) => return Ok(None),
            },
            None => {
                debug!("InMemory GET {} -> MISS", name);
                return Ok(None);
            }
        };

        let remaining_ttl = match self.rows.get(&StorageKeys::timeout_row(name)) {
            Some(row) => match row.value() {
                Row::Timeout(at) => at.saturating_duration_since(Instant::now()),
                _ => Duration::MAX,
            },
            None => Duration::MAX,
        };

        debug!("InMemory GET {} -> HIT (remaining: {:?})", name, remaining_ttl);
        Ok(Some(StoreHit::new(value, remaining_ttl)))
    }

    async fn set(&self, name: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or(now + FAR_FUTURE);
        self.rows
            .insert(StorageKeys::timeout_row(name), Row::Timeout(expires_at));
        self.rows.insert(StorageKeys::value_row(name), Row::Value(value));

        debug!("InMemory SET {} (TTL: {:?})", name, ttl);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.rows.remove(&StorageKeys::value_row(name));
        self.rows.remove(&StorageKeys::timeout_row(name));

        debug!("InMemory DELETE {}", name);
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize> {
        let before = self.rows.len();
        self.rows
            .retain(|row, _| !StorageKeys::matches_prefix(row, prefix));
        let removed = before.saturating_sub(self.rows.len());

        debug!("InMemory DELETE prefix {} ({} rows)", prefix, removed);
        Ok(removed)
    }

    async fn delete_all(&self) -> Result<usize> {
        let before = self.rows.len();
        self.rows.retain(|row, _| !StorageKeys::is_transient_row(row));
        let removed = before.saturating_sub(self.rows.len());

        warn!("InMemory DELETE all transient rows ({} rows)", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_absent() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_still_returned() {
        let store = InMemoryStore::new();
        store
            .set("feed", b"old".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();

        let hit = store.get("feed").await.unwrap().unwrap();
        assert_eq!(hit.remaining_ttl, Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(11)).await;

        let hit = store.get("feed").await.unwrap().unwrap();
        assert!(hit.is_expired());
        assert_eq!(hit.value, b"old".to_vec());
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_immediately() {
        let store = InMemoryStore::new();
        store.set("feed", b"v".to_vec(), Duration::ZERO).await.unwrap();
        assert!(store.get("feed").await.unwrap().unwrap().is_expired());
    }

    #[tokio::test]
    async fn test_set_writes_both_rows_and_delete_removes_them() {
        let store = InMemoryStore::new();
        store
            .set("feed", b"v".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(store.contains_row("_transient_feed"));
        assert!(store.contains_row("_transient_timeout_feed"));

        store.delete("feed").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_prefix_leaves_unrelated_rows() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set("post_1", b"a".to_vec(), ttl).await.unwrap();
        store.set("post_2", b"b".to_vec(), ttl).await.unwrap();
        store.set("page_1", b"c".to_vec(), ttl).await.unwrap();
        store.insert_raw("post_options", b"d".to_vec());

        let removed = store.delete_by_prefix("post_").await.unwrap();

        assert_eq!(removed, 4);
        assert!(store.get("post_1").await.unwrap().is_none());
        assert!(store.get("page_1").await.unwrap().is_some());
        assert!(store.contains_row("post_options"));
    }

    #[tokio::test]
    async fn test_delete_all_only_touches_transient_rows() {
        let store = InMemoryStore::new();
        store
            .set("feed", b"a".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();
        store.insert_raw("siteurl", b"x".to_vec());

        let removed = store.delete_all().await.unwrap();

        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
        assert!(store.contains_row("siteurl"));
    }
}
