//! Redis transient store implementation.

use super::{StoreHit, TransientStore};
use crate::error::{Error, Result};
use crate::key::{StorageKeys, VALUE_ROW_PREFIX};
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default Redis connection pool size.
/// Override with REDIS_POOL_SIZE environment variable
const DEFAULT_POOL_SIZE: usize = 16;

/// Keys fetched per SCAN round trip during purges.
const SCAN_BATCH: usize = 200;

/// Configuration for Redis backend.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub url: String, // e.g., "redis://localhost:6379"
    /// Prepended to every row name, to share one database between deployments.
    pub namespace: String,
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            url: "redis://localhost:6379".to_string(),
            namespace: String::new(),
            pool_size: 10,
        }
    }
}

/// Redis backend with connection pooling.
///
/// Entries are stored without a Redis-level expiry so that expired values
/// remain readable. Each cache name occupies two keys: the payload row and
/// a timeout row holding the expiry as unix seconds.
///
/// # Example
///
/// ```no_run
/// # use stale_cache::backend::{RedisStore, RedisConfig, TransientStore};
/// # use stale_cache::error::Result;
/// # use std::time::Duration;
/// # async fn example() -> Result<()> {
/// let config = RedisConfig {
///     url: "redis://localhost:6379".to_string(),
///     ..Default::default()
/// };
///
/// let store = RedisStore::new(config)?;
/// store.set("feed", b"value".to_vec(), Duration::from_secs(60)).await?;
/// let hit = store.get("feed").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    namespace: String,
}

impl RedisStore {
    /// Create new Redis store from configuration.
    ///
    /// # Errors
    /// Returns `Err` if connection pool creation fails
    pub fn new(config: RedisConfig) -> Result<Self> {
        let mut pool_config = Config::from_url(config.url.clone());
        pool_config.pool = Some(PoolConfig::new(config.pool_size));

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::ConfigError(format!("Failed to create connection pool: {}", e)))?;

        info!(
            "✓ Redis store initialized at {} (namespace: '{}', pool size: {})",
            config.url, config.namespace, config.pool_size
        );

        Ok(RedisStore {
            pool,
            namespace: config.namespace,
        })
    }

    /// Create from a connection URL directly.
    ///
    /// Pool size is determined by:
    /// 1. `REDIS_POOL_SIZE` environment variable (if set)
    /// 2. `DEFAULT_POOL_SIZE` constant (16)
    ///
    /// # Errors
    /// Returns `Err` if connection pool creation fails
    pub fn from_url(url: String) -> Result<Self> {
        let pool_size = std::env::var("REDIS_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);

        let config = RedisConfig {
            url,
            pool_size,
            ..Default::default()
        };
        Self::new(config)
    }

    async fn conn(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::BackendError(format!("Failed to get Redis connection: {}", e)))
    }

    fn row(&self, row: String) -> String {
        format!("{}{}", self.namespace, row)
    }

    /// Scan every transient row and delete those `select` accepts.
    async fn scan_delete<P>(&self, select: P) -> Result<usize>
    where
        P: Fn(&str) -> bool + Send,
    {
        let mut conn = self.conn().await?;
        let pattern = format!("{}{}*", self.namespace, VALUE_ROW_PREFIX);
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| Error::BackendError(format!("Redis SCAN failed: {}", e)))?;

            let doomed: Vec<&String> = keys
                .iter()
                .filter(|key| {
                    key.strip_prefix(self.namespace.as_str())
                        .map(&select)
                        .unwrap_or(false)
                })
                .collect();

            if !doomed.is_empty() {
                let deleted: usize = redis::cmd("DEL")
                    .arg(&doomed)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| Error::BackendError(format!("Redis DEL failed: {}", e)))?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl TransientStore for RedisStore {
    async fn get(&self, name: &str) -> Result<Option<StoreHit>> {
        let mut conn = self.conn().await?;

        let (value, expires_at): (Option<Vec<u8>>, Option<u64>) = redis::cmd("MGET")
            .arg(self.row(StorageKeys::value_row(name)))
            .arg(self.row(StorageKeys::timeout_row(name)))
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::BackendError(format!("Redis GET failed for {}: {}", name, e)))?;

        match value {
            Some(value) => {
                let remaining_ttl = match expires_at {
                    Some(at) => Duration::from_secs(at.saturating_sub(unix_now())),
                    None => Duration::MAX,
                };
                debug!("✓ Redis GET {} -> HIT (remaining: {:?})", name, remaining_ttl);
                Ok(Some(StoreHit::new(value, remaining_ttl)))
            }
            None => {
                debug!("✓ Redis GET {} -> MISS", name);
                Ok(None)
            }
        }
    }

    async fn set(&self, name: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        let expires_at = unix_now().saturating_add(ttl.as_secs());

        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.row(StorageKeys::value_row(name)))
            .arg(value)
            .ignore()
            .cmd("SET")
            .arg(self.row(StorageKeys::timeout_row(name)))
            .arg(expires_at)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::BackendError(format!("Redis SET failed for {}: {}", name, e)))?;

        debug!("✓ Redis SET {} (TTL: {:?})", name, ttl);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut conn = self.conn().await?;

        let _: usize = redis::cmd("DEL")
            .arg(self.row(StorageKeys::value_row(name)))
            .arg(self.row(StorageKeys::timeout_row(name)))
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::BackendError(format!("Redis DEL failed for {}: {}", name, e)))?;

        debug!("✓ Redis DELETE {}", name);
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize> {
        let prefix = prefix.to_string();
        let removed = self
            .scan_delete(move |row| StorageKeys::matches_prefix(row, &prefix))
            .await?;

        debug!("✓ Redis DELETE prefix ({} keys)", removed);
        Ok(removed)
    }

    async fn delete_all(&self) -> Result<usize> {
        let removed = self.scan_delete(StorageKeys::is_transient_row).await?;

        warn!("⚠ Redis DELETE all transient rows ({} keys)", removed);
        Ok(removed)
    }
}
