//! Value factories: the capability that produces a fresh value for a cache.

use crate::error::{Error, Result};
use crate::key::CacheName;
use crate::value::CacheValue;
use std::future::Future;

/// Produces a fresh value for a named cache.
///
/// Supplied by the caller at construction; a cache never subclasses or
/// specializes its factory. `seed` is the cache's in-process value (the
/// initial value, or the last one written or regenerated), which
/// factories are free to ignore.
///
/// # Example
///
/// ```ignore
/// struct HeadlineQuery { db: PgPool }
///
/// impl ValueFactory<Vec<Headline>> for HeadlineQuery {
///     async fn produce(&self, _name: &CacheName, _seed: Option<Vec<Headline>>) -> Result<Vec<Headline>> {
///         sqlx::query_as("SELECT id, title FROM headlines LIMIT 10")
///             .fetch_all(&self.db)
///             .await
///             .map_err(|e| Error::FactoryError(e.to_string()))
///     }
/// }
/// ```
pub trait ValueFactory<T: CacheValue>: Send + Sync + 'static {
    fn produce(
        &self,
        name: &CacheName,
        seed: Option<T>,
    ) -> impl Future<Output = Result<T>> + Send;
}

/// Adapts an async closure taking the cache name into a [`ValueFactory`].
pub struct FnFactory<F> {
    f: F,
}

impl<F> FnFactory<F> {
    pub fn new(f: F) -> Self {
        FnFactory { f }
    }
}

impl<T, F, Fut> ValueFactory<T> for FnFactory<F>
where
    T: CacheValue,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    fn produce(&self, name: &CacheName, _seed: Option<T>) -> impl Future<Output = Result<T>> + Send {
        (self.f)(name.to_string())
    }
}

/// Build a factory from an async closure.
pub fn from_fn<T, F, Fut>(f: F) -> FnFactory<F>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    FnFactory::new(f)
}

/// Factory that yields whatever value the cache currently holds in process.
///
/// Pairs with `write(value, true)`: the written value becomes the seed and
/// is stored as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeldValue;

impl<T: CacheValue> ValueFactory<T> for HeldValue {
    async fn produce(&self, name: &CacheName, seed: Option<T>) -> Result<T> {
        seed.ok_or_else(|| Error::FactoryError(format!("no value held for cache '{}'", name)))
    }
}
