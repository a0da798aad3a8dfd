//! Metrics hooks for cache reads and regenerations.

use std::time::Duration;

/// Receives cache events. Every method defaults to a no-op so
/// implementors only override what they export.
///
/// # Example
///
/// ```
/// use stale_cache::observability::CacheMetrics;
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use std::time::Duration;
///
/// #[derive(Default)]
/// struct StaleCounter(AtomicU64);
///
/// impl CacheMetrics for StaleCounter {
///     fn record_stale(&self, _key: &str, _duration: Duration) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///     }
/// }
/// ```
pub trait CacheMetrics: Send + Sync {
    /// A live entry was served.
    fn record_hit(&self, _key: &str, _duration: Duration) {}

    /// No usable entry; the value was computed synchronously.
    fn record_miss(&self, _key: &str, _duration: Duration) {}

    /// An expired entry was served and a regeneration requested.
    fn record_stale(&self, _key: &str, _duration: Duration) {}

    /// A background regeneration finished.
    fn record_regeneration(&self, _key: &str, _duration: Duration, _succeeded: bool) {}

    /// An operation failed.
    fn record_error(&self, _key: &str, _error: &str) {}
}

/// Metrics sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {}
