//! Wiring for a set of stale caches sharing one store and one job runner.

use crate::backend::TransientStore;
use crate::builder::StaleCacheBuilder;
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::events::{EventBus, RecordEvent};
use crate::registry::NamedCacheRegistry;
use crate::runner::{DeferredJobRunner, SweepRunner};
use crate::scheduler::RegenerationScheduler;
use crate::value::CacheValue;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Owns the collaborators every [`StaleCache`](crate::StaleCache) needs:
/// the store, the deferred-job runner, the name registry used to route
/// fired jobs back to their cache, and the record event bus.
///
/// Cheap to clone; clones share everything.
///
/// # Example
///
/// ```ignore
/// use stale_cache::{backend::InMemoryStore, factory, CacheService};
///
/// let service = CacheService::new(InMemoryStore::new());
/// let _sweeper = service.spawn_sweeper();
///
/// let headlines = service
///     .builder::<Vec<String>>("headlines")
///     .with_timeout_seconds(60)
///     .build(factory::from_fn(|_name| async { fetch_headlines().await }))?;
/// ```
pub struct CacheService<S: TransientStore, R: DeferredJobRunner + 'static = SweepRunner> {
    store: S,
    runner: Arc<R>,
    registry: Arc<NamedCacheRegistry>,
    scheduler: Arc<RegenerationScheduler>,
    events: Arc<EventBus>,
}

impl<S: TransientStore, R: DeferredJobRunner + 'static> Clone for CacheService<S, R> {
    fn clone(&self) -> Self {
        CacheService {
            store: self.store.clone(),
            runner: self.runner.clone(),
            registry: self.registry.clone(),
            scheduler: self.scheduler.clone(),
            events: self.events.clone(),
        }
    }
}

impl<S: TransientStore> CacheService<S, SweepRunner> {
    /// Service backed by an in-process [`SweepRunner`] with default tuning.
    pub fn new(store: S) -> Self {
        Self::with_runner(store, Arc::new(SweepRunner::new()), SchedulerConfig::default())
    }

    /// Like [`new`](Self::new), with tuning read from the environment.
    pub fn from_env(store: S) -> Self {
        Self::with_runner(store, Arc::new(SweepRunner::new()), SchedulerConfig::from_env())
    }

    /// Run every due regeneration job now.
    pub async fn sweep(&self) -> usize {
        self.runner.sweep().await
    }

    /// Start sweeping on the configured interval.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.runner
            .clone()
            .spawn(self.scheduler.config().sweep_interval)
    }
}

impl<S: TransientStore, R: DeferredJobRunner + 'static> CacheService<S, R> {
    /// Service backed by a host-provided job runner.
    pub fn with_runner(store: S, runner: Arc<R>, config: SchedulerConfig) -> Self {
        let registry = Arc::new(NamedCacheRegistry::new());
        let scheduler = RegenerationScheduler::new(runner.clone(), registry.clone(), config);

        CacheService {
            store,
            runner,
            registry,
            scheduler,
            events: Arc::new(EventBus::new()),
        }
    }

    /// Start describing a cache named `name`.
    pub fn builder<T: CacheValue>(&self, name: &str) -> StaleCacheBuilder<'_, T, S, R> {
        StaleCacheBuilder::new(self, name)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn runner(&self) -> &Arc<R> {
        &self.runner
    }

    pub fn registry(&self) -> &Arc<NamedCacheRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<RegenerationScheduler> {
        &self.scheduler
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Notify subscribed caches of a record change.
    ///
    /// # Errors
    /// Returns the first error raised by a subscriber.
    pub async fn publish(&self, event: RecordEvent) -> Result<()> {
        self.events.publish(event).await
    }

    /// Delete every stored row belonging to caches whose name starts with
    /// `prefix`. Registered caches are left in place and recompute on their
    /// next read.
    ///
    /// # Errors
    /// Returns `Error::BackendError` if the store fails.
    pub async fn purge_prefix(&self, prefix: &str) -> Result<usize> {
        let removed = self.store.delete_by_prefix(prefix).await?;
        warn!("Purged {} row(s) with cache prefix '{}'", removed, prefix);
        Ok(removed)
    }

    /// Delete every row any stale cache could have created.
    ///
    /// # Errors
    /// Returns `Error::BackendError` if the store fails.
    pub async fn purge_all(&self) -> Result<usize> {
        let removed = self.store.delete_all().await?;
        warn!("Purged all {} stale cache row(s)", removed);
        Ok(removed)
    }
}
