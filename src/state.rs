//! Entry lifecycle and read-path decisions.
//!
//! # Lifecycle
//!
//! ```text
//!            set                TTL elapses             read (stale allowed)
//! ABSENT ─────────▶ FRESH ─────────────────▶ EXPIRED ──────────────────────▶ STALE_SERVING
//!    ▲                ▲                                                          │
//!    │ invalidate     │ regenerate succeeds                      job dispatched │
//!    │                └──────────────────────── REGENERATING ◀──────────────────┘
//! ```
//!
//! A failed regeneration leaves the expired entry in place, so the next
//! stale read serves it again and schedules a retry.
//!
//! # Read paths
//!
//! | Entry | `fresh` | `always_return_stale` | regenerate-on-expiry | Path |
//! |-------|---------|-----------------------|----------------------|------|
//! | any | true | - | - | Recompute |
//! | absent | false | - | - | Recompute |
//! | fresh | false | - | - | Serve |
//! | expired | false | true | - | ServeStale |
//! | expired | false | false | true (default) | Recompute |
//! | expired | false | false | false | Serve |

use crate::backend::StoreHit;
use crate::config::CacheConfig;
use std::fmt;

/// Observable state of a single cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// No store entry.
    Absent,
    /// Entry present, TTL not elapsed.
    Fresh,
    /// Entry present, TTL elapsed, nothing scheduled.
    Expired,
    /// Expired entry being served while a regeneration job is pending.
    StaleServing,
    /// A dispatched job is recomputing the value.
    Regenerating,
}

impl EntryState {
    /// Classify an entry from the store lookup and scheduler flags.
    pub fn observe(hit: Option<&StoreHit>, pending: bool, regenerating: bool) -> Self {
        if regenerating {
            return EntryState::Regenerating;
        }
        match hit {
            None => EntryState::Absent,
            Some(hit) if !hit.is_expired() => EntryState::Fresh,
            Some(_) if pending => EntryState::StaleServing,
            Some(_) => EntryState::Expired,
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryState::Absent => write!(f, "ABSENT"),
            EntryState::Fresh => write!(f, "FRESH"),
            EntryState::Expired => write!(f, "EXPIRED"),
            EntryState::StaleServing => write!(f, "STALE_SERVING"),
            EntryState::Regenerating => write!(f, "REGENERATING"),
        }
    }
}

/// What a read does with the entry it found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPath {
    /// Return the stored value as-is.
    Serve,
    /// Return the stored (expired) value and schedule a regeneration.
    ServeStale,
    /// Compute synchronously, store, and return the new value.
    Recompute,
}

impl ReadPath {
    /// Pick the path for a read. Only ever inspects the store lookup, never
    /// the value factory, so serving is O(lookup).
    pub fn choose(hit: Option<&StoreHit>, fresh: bool, config: &CacheConfig) -> Self {
        if fresh {
            return ReadPath::Recompute;
        }
        match hit {
            None => ReadPath::Recompute,
            Some(hit) if !hit.is_expired() => ReadPath::Serve,
            Some(_) if config.always_return_stale => ReadPath::ServeStale,
            Some(_) if config.regenerate_on_expiry_even_if_not_always_stale => {
                ReadPath::Recompute
            }
            Some(_) => ReadPath::Serve,
        }
    }
}

impl fmt::Display for ReadPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadPath::Serve => write!(f, "Serve"),
            ReadPath::ServeStale => write!(f, "ServeStale"),
            ReadPath::Recompute => write!(f, "Recompute"),
        }
    }
}
