//! # stale-cache
//!
//! A stale-while-revalidate cache over a host key-value store.
//!
//! Reads never wait on recomputation once a value exists: an expired entry
//! is served as-is and a single background regeneration is scheduled for
//! it, however many readers observe the expiry.
//!
//! ## Features
//!
//! - **Stale serving:** expired values are returned immediately and refreshed in the background
//! - **Deduplicated regeneration:** at most one pending job per cache name
//! - **Backend agnostic:** in-memory and Redis stores, or bring your own `TransientStore`
//! - **Runner agnostic:** in-process `SweepRunner`, or plug in the host's job scheduler
//! - **Derived caches:** per-record query caches kept coherent by record events
//!
//! ## Quick Start
//!
//! ```ignore
//! use stale_cache::{backend::InMemoryStore, factory, CacheService};
//!
//! let service = CacheService::new(InMemoryStore::new());
//! let _sweeper = service.spawn_sweeper();
//!
//! let front_page = service
//!     .builder::<String>("front_page")
//!     .with_timeout_seconds(300)
//!     .build(factory::from_fn(|_name| async { render_front_page().await }))?;
//!
//! // Computes once, then serves from the store. After five minutes the
//! // old page is still returned while a sweep regenerates it.
//! let html = front_page.read(false).await?;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod factory;
pub mod key;
pub mod observability;
pub mod query;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod serialization;
pub mod service;
pub mod state;
pub mod value;

// Re-exports for convenience
pub use backend::{StoreHit, TransientStore};
pub use builder::StaleCacheBuilder;
pub use cache::StaleCache;
pub use config::{CacheConfig, SchedulerConfig};
pub use error::{Error, Result};
pub use events::{EventBus, RecordEvent};
pub use factory::ValueFactory;
pub use key::CacheName;
pub use query::{QueryCache, RecordQuery};
pub use registry::NamedCacheRegistry;
pub use runner::{DeferredJobRunner, SweepRunner};
pub use scheduler::RegenerationScheduler;
pub use service::CacheService;
pub use state::EntryState;
pub use value::CacheValue;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
