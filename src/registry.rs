//! Name-to-cache registry used by background dispatch.
//!
//! Deferred jobs identify their cache by name only, so the scheduler
//! needs a way back from a name to a live cache. The registry holds weak
//! references: dropping the last handle to a cache unregisters it in
//! effect, and [`NamedCacheRegistry::resolve`] prunes the dead entry.

use crate::error::{Error, Result};
use crate::key::CacheName;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::{Arc, Weak};

/// The dispatch seam between the scheduler and a cache.
///
/// Object-safe so caches of any value type can share one registry.
pub trait RegenerationTarget: Send + Sync {
    fn cache_name(&self) -> &CacheName;

    /// Recompute and store the value.
    fn regenerate_boxed(&self) -> BoxFuture<'_, Result<()>>;
}

/// Process-wide mapping from cache name to cache.
#[derive(Default)]
pub struct NamedCacheRegistry {
    caches: DashMap<CacheName, Weak<dyn RegenerationTarget>>,
}

impl NamedCacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cache under its name.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the name is empty or already held by
    /// a live cache.
    pub fn register<C>(&self, cache: &Arc<C>) -> Result<()>
    where
        C: RegenerationTarget + 'static,
    {
        let name = cache.cache_name().clone();
        if name.is_empty() {
            return Err(Error::ConfigError(
                "cannot register a cache without a name".to_string(),
            ));
        }

        let weak = Arc::downgrade(cache) as Weak<dyn RegenerationTarget>;
        match self.caches.entry(name) {
            Entry::Occupied(mut entry) => {
                if entry.get().strong_count() > 0 {
                    return Err(Error::ConfigError(format!(
                        "a cache named '{}' is already registered",
                        entry.key()
                    )));
                }
                entry.insert(weak);
            }
            Entry::Vacant(entry) => {
                entry.insert(weak);
            }
        }
        Ok(())
    }

    /// Remove a cache. Returns whether it was registered.
    pub fn deregister(&self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Look up a live cache by name.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn RegenerationTarget>> {
        let weak = self.caches.get(name).map(|entry| entry.value().clone())?;
        match weak.upgrade() {
            Some(target) => Some(target),
            None => {
                debug!("Pruning dropped cache {} from registry", name);
                self.caches.remove_if(name, |_, w| w.strong_count() == 0);
                None
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Names of every registered cache, live or not yet pruned.
    pub fn names(&self) -> Vec<CacheName> {
        self.caches.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.caches.clear();
    }
}
