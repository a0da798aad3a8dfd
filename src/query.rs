//! Per-record query caches kept coherent through record events.
//!
//! A [`QueryCache`] owns one [`StaleCache`] per record id, named by
//! substituting the id into a key template such as `"related_posts_%d"`.
//! It subscribes to the service's [`EventBus`](crate::events::EventBus)
//! for one record type:
//!
//! - **saved**: a cache this process tracks is recomputed immediately;
//!   otherwise only its store entry is dropped
//! - **deleted**: the entry is dropped and the per-record cache retired

use crate::backend::TransientStore;
use crate::cache::StaleCache;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::events::{EventHandler, RecordEvent, SubscriptionId};
use crate::factory::ValueFactory;
use crate::key::CacheName;
use crate::runner::{DeferredJobRunner, SweepRunner};
use crate::service::CacheService;
use crate::value::CacheValue;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// The domain query behind a [`QueryCache`]: loads the value for one record.
pub trait RecordQuery<T: CacheValue>: Send + Sync + 'static {
    fn fetch(&self, id: &str) -> impl Future<Output = Result<T>> + Send;
}

/// [`ValueFactory`] running a [`RecordQuery`] for a fixed record id.
pub struct RecordFactory<Q> {
    query: Arc<Q>,
    id: String,
}

impl<T, Q> ValueFactory<T> for RecordFactory<Q>
where
    T: CacheValue,
    Q: RecordQuery<T>,
{
    async fn produce(&self, _name: &CacheName, _seed: Option<T>) -> Result<T> {
        self.query.fetch(&self.id).await
    }
}

type RecordCache<T, S, Q> = StaleCache<T, S, RecordFactory<Q>>;

/// Lazily created per-record stale caches bound to record events.
pub struct QueryCache<T, S, Q, R = SweepRunner>
where
    T: CacheValue,
    S: TransientStore,
    Q: RecordQuery<T>,
    R: DeferredJobRunner + 'static,
{
    service: CacheService<S, R>,
    key_template: String,
    record_type: String,
    base: CacheConfig,
    query: Arc<Q>,
    caches: DashMap<String, Arc<RecordCache<T, S, Q>>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl<T, S, Q, R> QueryCache<T, S, Q, R>
where
    T: CacheValue,
    S: TransientStore,
    Q: RecordQuery<T>,
    R: DeferredJobRunner + 'static,
{
    /// Create the query cache and subscribe it to `record_type` events.
    ///
    /// `base` supplies the timeout and read policy for every per-record
    /// cache; its name is replaced by the rendered template.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if `key_template` has no `%s`/`%d`
    /// placeholder.
    pub fn new(
        service: &CacheService<S, R>,
        key_template: &str,
        record_type: &str,
        base: CacheConfig,
        query: Q,
    ) -> Result<Arc<Self>> {
        CacheName::from_template(key_template, "")?;

        let cache = Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let handler: EventHandler = Arc::new(move |event: RecordEvent| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(cache) => cache.on_event(event).await,
                        None => Ok(()),
                    }
                }
                .boxed()
            });
            let subscription = service.events().subscribe(record_type, handler);

            QueryCache {
                service: service.clone(),
                key_template: key_template.to_string(),
                record_type: record_type.to_string(),
                base,
                query: Arc::new(query),
                caches: DashMap::new(),
                subscription: Mutex::new(Some(subscription)),
            }
        });

        info!(
            "✓ Query cache {} bound to {} events",
            cache.key_template, cache.record_type
        );
        Ok(cache)
    }

    /// Cache name used for record `id`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the template has no placeholder.
    pub fn name_for(&self, id: &str) -> Result<CacheName> {
        CacheName::from_template(&self.key_template, id)
    }

    /// The per-record cache for `id`, created and activated on first use.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if activation fails, e.g. when two ids
    /// truncate to the same cache name.
    pub fn cache_for(&self, id: &str) -> Result<Arc<RecordCache<T, S, Q>>> {
        if let Some(cache) = self.caches.get(id) {
            return Ok(cache.clone());
        }

        match self.caches.entry(id.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let config = CacheConfig {
                    name: self.name_for(id)?,
                    ..self.base.clone()
                };
                let factory = RecordFactory {
                    query: self.query.clone(),
                    id: id.to_string(),
                };
                let cache = StaleCache::new(
                    config,
                    self.service.store().clone(),
                    factory,
                    self.service.scheduler().clone(),
                )
                .activate()?;
                entry.insert(cache.clone());
                Ok(cache)
            }
        }
    }

    /// Read the cached query result for record `id`.
    ///
    /// # Errors
    /// Same as [`StaleCache::read`].
    pub async fn get(&self, id: &str, fresh: bool) -> Result<T> {
        self.cache_for(id)?.read(fresh).await
    }

    /// Number of per-record caches this process has created.
    pub fn tracked(&self) -> usize {
        self.caches.len()
    }

    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Unsubscribe from record events and retire every per-record cache.
    /// Stored entries are left for their TTL.
    pub fn teardown(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = subscription {
            self.service.events().unsubscribe(id);
        }

        for entry in self.caches.iter() {
            entry.value().deactivate();
        }
        self.caches.clear();
        info!("Query cache {} torn down", self.key_template);
    }

    async fn on_event(&self, event: RecordEvent) -> Result<()> {
        match event {
            RecordEvent::Saved { id, .. } => {
                let tracked = self.caches.get(&id).map(|cache| cache.clone());
                match tracked {
                    Some(cache) => {
                        debug!("Record {} saved, recomputing {}", id, cache.name());
                        cache.reset_entry().await.map(|_| ())
                    }
                    None => {
                        let name = self.name_for(&id)?;
                        debug!("Record {} saved, dropping {}", id, name);
                        self.service.store().delete(name.as_str()).await
                    }
                }
            }
            RecordEvent::Deleted { id, .. } => {
                let name = self.name_for(&id)?;
                debug!("Record {} deleted, dropping {}", id, name);
                if let Some((_, cache)) = self.caches.remove(&id) {
                    cache.deactivate();
                }
                self.service.store().delete(name.as_str()).await
            }
        }
    }
}
