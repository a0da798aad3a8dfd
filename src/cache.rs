//! Stale cache - serves reads without waiting on recomputation.

use crate::backend::TransientStore;
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::factory::ValueFactory;
use crate::key::CacheName;
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::registry::RegenerationTarget;
use crate::scheduler::RegenerationScheduler;
use crate::state::{EntryState, ReadPath};
use crate::value::CacheValue;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};

/// A single named value kept in a [`TransientStore`], served
/// stale-while-revalidate.
///
/// Reads return whatever the store holds, even past its TTL, and hand
/// the expired entry to the [`RegenerationScheduler`] for a background
/// recompute. Only a missing entry, a forced fresh read, or a cache
/// configured not to serve stale values makes a read wait on the
/// [`ValueFactory`].
///
/// # Example
///
/// ```ignore
/// use stale_cache::{CacheConfig, StaleCache, factory};
///
/// let cache = StaleCache::new(
///     CacheConfig::new("front_page").with_timeout_seconds(300),
///     store,
///     factory::from_fn(|_name| async { render_front_page().await }),
///     scheduler,
/// )
/// .activate()?;
///
/// let html: String = cache.read(false).await?;
/// ```
pub struct StaleCache<T, S, F>
where
    T: CacheValue,
    S: TransientStore,
    F: ValueFactory<T>,
{
    config: CacheConfig,
    timeout_seconds: AtomicU64,
    store: S,
    factory: F,
    scheduler: Arc<RegenerationScheduler>,
    held: RwLock<Option<T>>,
    regen_lock: Mutex<()>,
    regenerating: AtomicBool,
    metrics: Box<dyn CacheMetrics>,
}

/// Clears the regenerating flag however the regeneration ends.
struct RegeneratingFlag<'a>(&'a AtomicBool);

impl<'a> RegeneratingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        RegeneratingFlag(flag)
    }
}

impl Drop for RegeneratingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<T, S, F> StaleCache<T, S, F>
where
    T: CacheValue,
    S: TransientStore,
    F: ValueFactory<T>,
{
    /// Create an inactive cache. Call [`activate`](Self::activate) before use.
    pub fn new(
        config: CacheConfig,
        store: S,
        factory: F,
        scheduler: Arc<RegenerationScheduler>,
    ) -> Self {
        StaleCache {
            timeout_seconds: AtomicU64::new(config.timeout_seconds),
            config,
            store,
            factory,
            scheduler,
            held: RwLock::new(None),
            regen_lock: Mutex::new(()),
            regenerating: AtomicBool::new(false),
            metrics: Box::new(NoOpMetrics),
        }
    }

    /// Seed the in-process value handed to the factory.
    pub fn with_initial_value(self, value: T) -> Self {
        self.set_held(value);
        self
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Validate the descriptor and register the cache for background dispatch.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the name is empty or already taken
    /// by a live cache.
    pub fn activate(self) -> Result<Arc<Self>> {
        self.config.validate()?;
        let cache = Arc::new(self);
        cache.scheduler.registry().register(&cache)?;

        info!(
            "✓ Cache {} activated (timeout: {}s, always_return_stale: {})",
            cache.config.name,
            cache.timeout_seconds.load(Ordering::Relaxed),
            cache.config.always_return_stale
        );
        Ok(cache)
    }

    /// Unregister the cache and drop any pending regeneration.
    pub fn deactivate(&self) {
        self.scheduler.registry().deregister(self.config.name.as_str());
        self.scheduler.cancel(self.config.name.as_str());
        info!("Cache {} deactivated", self.config.name);
    }

    pub fn name(&self) -> &CacheName {
        &self.config.name
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.load(Ordering::Relaxed))
    }

    /// Override the TTL applied to subsequent writes.
    pub fn set_timeout(&self, seconds: u64) {
        self.timeout_seconds.store(seconds, Ordering::Relaxed);
    }

    /// The descriptor as currently in effect.
    pub fn descriptor(&self) -> CacheConfig {
        self.config
            .clone()
            .with_timeout_seconds(self.timeout_seconds.load(Ordering::Relaxed))
    }

    /// The in-process value: the initial value, or the last one written,
    /// computed or regenerated.
    pub fn held_value(&self) -> Option<T> {
        self.held
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_held(&self, value: T) {
        *self.held.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    /// Read the value.
    ///
    /// With `fresh` set, or when the store has no usable entry, the value is
    /// computed synchronously and stored. An expired entry is returned as-is
    /// when stale serving is on, and a single regeneration is scheduled for
    /// it; that path never touches the factory.
    ///
    /// # Errors
    ///
    /// - `Error::BackendError`: the store lookup or write failed
    /// - any factory error, when the value had to be computed synchronously
    /// - `Error::SerializationError`: the computed value could not be encoded
    pub async fn read(&self, fresh: bool) -> Result<T> {
        let timer = Instant::now();
        let name = &self.config.name;

        let hit = if fresh {
            None
        } else {
            match self.store.get(name.as_str()).await {
                Ok(hit) => hit,
                Err(e) => {
                    self.metrics.record_error(name.as_str(), &e.to_string());
                    return Err(e);
                }
            }
        };

        let config = self.descriptor();
        let path = ReadPath::choose(hit.as_ref(), fresh, &config);
        debug!("» Read {} (fresh: {}, path: {})", name, fresh, path);

        let hit = match hit {
            Some(hit) if path != ReadPath::Recompute => hit,
            _ => return self.recompute_for_read(timer).await,
        };

        match T::deserialize_from_cache(&hit.value) {
            Ok(value) => {
                if path == ReadPath::ServeStale {
                    self.request_regeneration();
                    self.metrics.record_stale(name.as_str(), timer.elapsed());
                } else {
                    self.metrics.record_hit(name.as_str(), timer.elapsed());
                }
                Ok(value)
            }
            Err(e) if e.is_corrupt_entry() => {
                warn!("Unreadable entry for {} ({}), recomputing", name, e);
                self.recompute_for_read(timer).await
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the in-process value.
    ///
    /// Waits for a running regeneration, so its result cannot replace
    /// `value`. Any pending regeneration is cancelled. With `reset_entry`
    /// the store entry is then recomputed synchronously, with `value` as
    /// the factory's seed.
    ///
    /// # Errors
    /// - `Error::Timeout`: the regeneration lock was not acquired in time
    /// - same as [`reset_entry`](Self::reset_entry), when `reset_entry` is set
    pub async fn write(&self, value: T, reset_entry: bool) -> Result<()> {
        {
            let _guard = self.lock_entry().await?;
            self.set_held(value);
            self.scheduler.cancel(self.config.name.as_str());
        }

        if reset_entry {
            self.reset_entry().await?;
        }
        Ok(())
    }

    /// Recompute the entry now and swap it into the store.
    ///
    /// # Errors
    /// - `Error::Timeout`: the regeneration lock was not acquired in time
    /// - any factory or store error; the previous entry is kept on factory failure
    pub async fn reset_entry(&self) -> Result<T> {
        let _guard = self.lock_entry().await?;
        let value = self
            .factory
            .produce(&self.config.name, self.held_value())
            .await?;
        self.swap_in(&value).await?;
        Ok(value)
    }

    /// Delete the store entry. A pending regeneration is left to run.
    ///
    /// # Errors
    /// Returns `Error::BackendError` if the delete fails.
    pub async fn invalidate(&self) -> Result<()> {
        self.store.delete(self.config.name.as_str()).await?;
        debug!("✓ Cache invalidated for {}", self.config.name);
        Ok(())
    }

    /// Recompute the value and swap it into the store.
    ///
    /// Called by the scheduler when a regeneration job fires. The current
    /// entry is only replaced once the factory has succeeded, so a failure
    /// leaves the last known value for the next stale read.
    ///
    /// # Errors
    /// - `Error::Timeout`: another regeneration held the lock too long
    /// - `Error::RegenerationFailed`: the factory failed
    /// - `Error::BackendError`: the new value could not be stored
    pub async fn regenerate(&self) -> Result<T> {
        let timer = Instant::now();
        let name = &self.config.name;

        let _guard = self.lock_entry().await?;
        let flag = RegeneratingFlag::raise(&self.regenerating);

        let outcome = match self.factory.produce(name, self.held_value()).await {
            Ok(value) => self.swap_in(&value).await.map(|_| value),
            Err(e) => Err(Error::RegenerationFailed(format!("{}: {}", name, e))),
        };
        drop(flag);

        match &outcome {
            Ok(_) => {
                info!("✓ Regenerated {} in {:?}", name, timer.elapsed());
                self.metrics
                    .record_regeneration(name.as_str(), timer.elapsed(), true);
            }
            Err(e) => {
                warn!("✗ Regeneration of {} failed, keeping last value: {}", name, e);
                self.metrics
                    .record_regeneration(name.as_str(), timer.elapsed(), false);
                self.metrics.record_error(name.as_str(), &e.to_string());
            }
        }
        outcome
    }

    /// Current lifecycle state of the entry.
    ///
    /// # Errors
    /// Returns `Error::BackendError` if the store lookup fails.
    pub async fn state(&self) -> Result<EntryState> {
        let name = self.config.name.as_str();
        let hit = self.store.get(name).await?;
        Ok(EntryState::observe(
            hit.as_ref(),
            self.scheduler.is_pending(name),
            self.regenerating.load(Ordering::SeqCst),
        ))
    }

    /// Get store reference (for advanced use).
    pub fn store(&self) -> &S {
        &self.store
    }

    async fn recompute_for_read(&self, timer: Instant) -> Result<T> {
        let name = &self.config.name;
        let result = match self.factory.produce(name, self.held_value()).await {
            Ok(value) => self.store_value(&value).await.map(|_| value),
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => self.metrics.record_miss(name.as_str(), timer.elapsed()),
            Err(e) => self.metrics.record_error(name.as_str(), &e.to_string()),
        }
        result
    }

    fn request_regeneration(&self) {
        match self.scheduler.schedule_once(&self.config.name) {
            Ok(true) => debug!("Serving stale {} while regenerating", self.config.name),
            Ok(false) => debug!("Serving stale {} (regeneration pending)", self.config.name),
            Err(e) => {
                warn!(
                    "Could not schedule regeneration of {}: {}",
                    self.config.name, e
                );
                self.metrics
                    .record_error(self.config.name.as_str(), &e.to_string());
            }
        }
    }

    async fn lock_entry(&self) -> Result<MutexGuard<'_, ()>> {
        let timeout = self.scheduler.config().lock_timeout;
        tokio::time::timeout(timeout, self.regen_lock.lock())
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "regeneration lock for {} not acquired within {:?}",
                    self.config.name, timeout
                ))
            })
    }

    async fn store_value(&self, value: &T) -> Result<()> {
        let bytes = value.serialize_for_cache()?;
        self.store
            .set(self.config.name.as_str(), bytes, self.timeout())
            .await?;
        self.set_held(value.clone());
        Ok(())
    }

    /// Replace the stored entry with an already computed value.
    async fn swap_in(&self, value: &T) -> Result<()> {
        let bytes = value.serialize_for_cache()?;
        let name = self.config.name.as_str();
        self.store.delete(name).await?;
        self.store.set(name, bytes, self.timeout()).await?;
        self.set_held(value.clone());
        Ok(())
    }
}

impl<T, S, F> RegenerationTarget for StaleCache<T, S, F>
where
    T: CacheValue,
    S: TransientStore,
    F: ValueFactory<T>,
{
    fn cache_name(&self) -> &CacheName {
        &self.config.name
    }

    fn regenerate_boxed(&self) -> BoxFuture<'_, Result<()>> {
        async move { self.regenerate().await.map(|_| ()) }.boxed()
    }
}
