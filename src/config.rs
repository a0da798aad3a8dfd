//! Cache descriptors and scheduler tuning.

use crate::error::{Error, Result};
use crate::key::{CacheName, RESERVED_NAME_PREFIX};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default lease on a pending regeneration job before it is considered lost.
const DEFAULT_PENDING_TIMEOUT: Duration = Duration::from_secs(600);

/// Default wait for the per-key regeneration lock.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default tick of the in-process sweeper.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(1000);

fn default_true() -> bool {
    true
}

/// Construction parameters for a [`StaleCache`](crate::StaleCache).
///
/// The name is truncated to 40 characters when the descriptor is built,
/// including when it is deserialized.
///
/// ```
/// use stale_cache::CacheConfig;
///
/// let config = CacheConfig::from_json(r#"{ "name": "front_page", "timeout_seconds": 300 }"#).unwrap();
/// assert!(config.always_return_stale);
/// assert_eq!(config.timeout().as_secs(), 300);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub name: CacheName,

    /// TTL applied to every stored value. Zero expires immediately.
    #[serde(default)]
    pub timeout_seconds: u64,

    /// Serve expired values and regenerate them in the background.
    #[serde(default = "default_true")]
    pub always_return_stale: bool,

    /// With `always_return_stale` off, whether reading an expired entry
    /// recomputes it (`true`) or returns the stored value untouched (`false`).
    #[serde(default = "default_true")]
    pub regenerate_on_expiry_even_if_not_always_stale: bool,
}

impl CacheConfig {
    pub fn new(name: impl AsRef<str>) -> Self {
        CacheConfig {
            name: CacheName::new(name),
            timeout_seconds: 0,
            always_return_stale: true,
            regenerate_on_expiry_even_if_not_always_stale: true,
        }
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_always_return_stale(mut self, enabled: bool) -> Self {
        self.always_return_stale = enabled;
        self
    }

    pub fn with_regenerate_on_expiry(mut self, enabled: bool) -> Self {
        self.regenerate_on_expiry_even_if_not_always_stale = enabled;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Parse a descriptor from JSON.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` on malformed JSON or missing name.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("Invalid cache descriptor: {}", e)))
    }

    /// Check the descriptor is activatable.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the name is empty or reserved.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::ConfigError(
                "cache name must be set before activation".to_string(),
            ));
        }
        if self.name.is_reserved() {
            return Err(Error::ConfigError(format!(
                "cache name '{}' starts with reserved prefix '{}'",
                self.name, RESERVED_NAME_PREFIX
            )));
        }
        Ok(())
    }
}

/// Tuning for the regeneration scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How long a pending job holds its key before a new one may replace it.
    pub pending_timeout: Duration,
    /// How long `regenerate` waits for the per-key lock.
    pub lock_timeout: Duration,
    /// Tick of [`SweepRunner::spawn`](crate::runner::SweepRunner::spawn).
    pub sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            pending_timeout: DEFAULT_PENDING_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl SchedulerConfig {
    /// Defaults, overridden by:
    /// - `STALE_CACHE_PENDING_TIMEOUT_SECS`
    /// - `STALE_CACHE_LOCK_TIMEOUT_SECS`
    /// - `STALE_CACHE_SWEEP_INTERVAL_MS`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let env_u64 = |key: &str| std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok());

        SchedulerConfig {
            pending_timeout: env_u64("STALE_CACHE_PENDING_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.pending_timeout),
            lock_timeout: env_u64("STALE_CACHE_LOCK_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_timeout),
            sweep_interval: env_u64("STALE_CACHE_SWEEP_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.sweep_interval),
        }
    }
}
