//! Fluent construction of stale caches.

use crate::backend::TransientStore;
use crate::cache::StaleCache;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::factory::ValueFactory;
use crate::observability::CacheMetrics;
use crate::runner::{DeferredJobRunner, SweepRunner};
use crate::service::CacheService;
use crate::value::CacheValue;
use std::sync::Arc;

/// Fluent builder for a [`StaleCache`] wired into a [`CacheService`].
///
/// # Example
///
/// ```ignore
/// let sidebar = service
///     .builder::<String>("sidebar")
///     .with_timeout_seconds(300)
///     .with_always_return_stale(false)
///     .with_initial_value(String::new())
///     .build(factory::HeldValue)?;
/// ```
pub struct StaleCacheBuilder<'a, T, S, R = SweepRunner>
where
    T: CacheValue,
    S: TransientStore,
    R: DeferredJobRunner + 'static,
{
    service: &'a CacheService<S, R>,
    config: CacheConfig,
    initial_value: Option<T>,
    metrics: Option<Box<dyn CacheMetrics>>,
}

impl<'a, T, S, R> StaleCacheBuilder<'a, T, S, R>
where
    T: CacheValue,
    S: TransientStore,
    R: DeferredJobRunner + 'static,
{
    pub(crate) fn new(service: &'a CacheService<S, R>, name: &str) -> Self {
        Self {
            service,
            config: CacheConfig::new(name),
            initial_value: None,
            metrics: None,
        }
    }

    /// Replace the whole descriptor, e.g. one loaded with
    /// [`CacheConfig::from_json`].
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.timeout_seconds = seconds;
        self
    }

    pub fn with_always_return_stale(mut self, enabled: bool) -> Self {
        self.config.always_return_stale = enabled;
        self
    }

    pub fn with_regenerate_on_expiry(mut self, enabled: bool) -> Self {
        self.config.regenerate_on_expiry_even_if_not_always_stale = enabled;
        self
    }

    /// Value held in process before anything is written or computed.
    pub fn with_initial_value(mut self, value: T) -> Self {
        self.initial_value = Some(value);
        self
    }

    pub fn with_metrics(mut self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Create and activate the cache.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if the name is empty or already
    /// registered to a live cache.
    pub fn build<F: ValueFactory<T>>(self, factory: F) -> Result<Arc<StaleCache<T, S, F>>> {
        let mut cache = StaleCache::new(
            self.config,
            self.service.store().clone(),
            factory,
            self.service.scheduler().clone(),
        );

        if let Some(value) = self.initial_value {
            cache = cache.with_initial_value(value);
        }
        if let Some(metrics) = self.metrics {
            cache = cache.with_metrics(metrics);
        }

        cache.activate()
    }
}
