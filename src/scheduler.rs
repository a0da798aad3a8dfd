//! Deduplicating regeneration scheduler.
//!
//! Sits between stale reads and the host's [`DeferredJobRunner`]. A stale
//! read asks for a regeneration of its cache; the scheduler forwards at
//! most one job per cache name to the runner and holds a pending flag
//! until that job has been dispatched, whatever its outcome. Every stale
//! read in between is a no-op.
//!
//! A pending flag is a lease, not a lock: once it is older than
//! [`SchedulerConfig::pending_timeout`] a new job may replace it, so a job
//! the runner lost cannot block regeneration of its key forever.

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::key::CacheName;
use crate::registry::NamedCacheRegistry;
use crate::runner::DeferredJobRunner;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// Base of the hook names under which schedulers register with a runner.
/// Each scheduler appends its own id, so several can share one runner.
pub const REGENERATE_HOOK: &str = "stale_cache_regenerate";

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

/// A pending regeneration. Its presence in the scheduler is the pending flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegenerationJob {
    pub key: CacheName,
    pub scheduled_at: Instant,
    pub id: u64,
}

/// Schedules at most one outstanding regeneration per cache name.
pub struct RegenerationScheduler {
    pending: DashMap<CacheName, RegenerationJob>,
    hook: String,
    runner: Arc<dyn DeferredJobRunner>,
    registry: Arc<NamedCacheRegistry>,
    config: SchedulerConfig,
    next_id: AtomicU64,
}

impl RegenerationScheduler {
    /// Create a scheduler and bind its dispatch callback to the runner.
    pub fn new(
        runner: Arc<dyn DeferredJobRunner>,
        registry: Arc<NamedCacheRegistry>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let hook = format!(
            "{}_{}",
            REGENERATE_HOOK,
            NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed)
        );
        let scheduler = Arc::new(RegenerationScheduler {
            pending: DashMap::new(),
            hook: hook.clone(),
            runner: runner.clone(),
            registry,
            config,
            next_id: AtomicU64::new(1),
        });

        let weak = Arc::downgrade(&scheduler);
        runner.register(
            &hook,
            Arc::new(move |name: String| {
                let weak = weak.clone();
                async move {
                    let Some(scheduler) = weak.upgrade() else {
                        debug!("Scheduler gone, dropping regeneration of {}", name);
                        return;
                    };
                    if let Err(e) = scheduler.dispatch(&name).await {
                        warn!("Regeneration job for {} failed: {}", name, e);
                    }
                }
                .boxed()
            }),
        );

        scheduler
    }

    /// Request a regeneration of `name`.
    ///
    /// Returns `Ok(true)` if a job was handed to the runner, `Ok(false)` if
    /// one was already pending.
    ///
    /// # Errors
    /// Returns the runner's error if it refuses the job; the pending flag is
    /// rolled back so a later read can retry.
    pub fn schedule_once(&self, name: &CacheName) -> Result<bool> {
        let now = Instant::now();

        let id = match self.pending.entry(name.clone()) {
            Entry::Occupied(mut entry) => {
                let age = now.saturating_duration_since(entry.get().scheduled_at);
                if age < self.config.pending_timeout {
                    debug!("Regeneration already pending for {}", name);
                    return Ok(false);
                }
                warn!(
                    "Pending regeneration for {} outlived its lease ({:?}), rescheduling",
                    name, age
                );
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                entry.insert(RegenerationJob {
                    key: name.clone(),
                    scheduled_at: now,
                    id,
                });
                id
            }
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                entry.insert(RegenerationJob {
                    key: name.clone(),
                    scheduled_at: now,
                    id,
                });
                id
            }
        };

        if let Err(e) = self
            .runner
            .schedule_once(&self.hook, name.as_str(), now)
        {
            self.pending.remove_if(name.as_str(), |_, job| job.id == id);
            return Err(e);
        }

        debug!("✓ Regeneration of {} scheduled (job {})", name, id);
        Ok(true)
    }

    /// Run a fired job: regenerate the named cache, then clear its pending
    /// flag whatever the outcome.
    ///
    /// Jobs whose flag was cleared by [`cancel`](Self::cancel) are skipped.
    ///
    /// # Errors
    /// - `Error::NotRegistered`: no live cache has this name
    /// - any error from the cache's regeneration
    pub async fn dispatch(&self, name: &str) -> Result<()> {
        let id = match self.pending.get(name) {
            Some(job) => job.id,
            None => {
                debug!("Skipping regeneration of {}: no longer pending", name);
                return Ok(());
            }
        };

        let result = match self.registry.resolve(name) {
            Some(target) => target.regenerate_boxed().await,
            None => Err(Error::NotRegistered(name.to_string())),
        };

        self.pending.remove_if(name, |_, job| job.id == id);
        result
    }

    /// Clear the pending flag for `name`. Returns whether one was set.
    pub fn cancel(&self, name: &str) -> bool {
        let cancelled = self.pending.remove(name).is_some();
        if cancelled {
            debug!("Cancelled pending regeneration of {}", name);
        }
        cancelled
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.contains_key(name)
    }

    pub fn pending_job(&self, name: &str) -> Option<RegenerationJob> {
        self.pending.get(name).map(|job| job.value().clone())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Hook name this scheduler's jobs run under.
    pub fn hook(&self) -> &str {
        &self.hook
    }

    pub fn registry(&self) -> &Arc<NamedCacheRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegenerationTarget;
    use crate::runner::{JobHandler, SweepRunner};
    use futures::future::BoxFuture;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct Probe {
        name: CacheName,
        calls: AtomicU32,
        fail: bool,
    }

    impl RegenerationTarget for Probe {
        fn cache_name(&self) -> &CacheName {
            &self.name
        }

        fn regenerate_boxed(&self) -> BoxFuture<'_, Result<()>> {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.fail {
                    Err(Error::RegenerationFailed("probe".to_string()))
                } else {
                    Ok(())
                }
            }
            .boxed()
        }
    }

    struct RefusingRunner;

    impl DeferredJobRunner for RefusingRunner {
        fn register(&self, _hook: &str, _handler: JobHandler) {}

        fn schedule_once(&self, _hook: &str, _arg: &str, _run_at: Instant) -> Result<()> {
            Err(Error::ScheduleError("queue full".to_string()))
        }
    }

    fn setup(fail: bool) -> (Arc<SweepRunner>, Arc<RegenerationScheduler>, Arc<Probe>) {
        let runner = Arc::new(SweepRunner::new());
        let registry = Arc::new(NamedCacheRegistry::new());
        let scheduler = RegenerationScheduler::new(
            runner.clone(),
            registry.clone(),
            SchedulerConfig::default(),
        );
        let probe = Arc::new(Probe {
            name: CacheName::new("feed"),
            calls: AtomicU32::new(0),
            fail,
        });
        registry.register(&probe).unwrap();
        (runner, scheduler, probe)
    }

    #[tokio::test]
    async fn test_schedule_once_dedups() {
        let (runner, scheduler, _probe) = setup(false);
        let name = CacheName::new("feed");

        assert!(scheduler.schedule_once(&name).unwrap());
        assert!(!scheduler.schedule_once(&name).unwrap());
        assert!(!scheduler.schedule_once(&name).unwrap());

        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(runner.queued_len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_regenerates_and_clears_pending() {
        let (runner, scheduler, probe) = setup(false);
        let name = CacheName::new("feed");

        scheduler.schedule_once(&name).unwrap();
        runner.sweep().await;

        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_pending("feed"));

        // A new stale read may schedule again.
        assert!(scheduler.schedule_once(&name).unwrap());
    }

    #[tokio::test]
    async fn test_failed_regeneration_clears_pending() {
        let (runner, scheduler, probe) = setup(true);
        let name = CacheName::new("feed");

        scheduler.schedule_once(&name).unwrap();
        runner.sweep().await;

        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_pending("feed"));
    }

    #[tokio::test]
    async fn test_cancelled_job_is_skipped() {
        let (runner, scheduler, probe) = setup(false);
        let name = CacheName::new("feed");

        scheduler.schedule_once(&name).unwrap();
        assert!(scheduler.cancel("feed"));
        runner.sweep().await;

        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispatch_for_unregistered_name() {
        let (_runner, scheduler, _probe) = setup(false);
        let orphan = CacheName::new("orphan");

        scheduler.schedule_once(&orphan).unwrap();
        let result = scheduler.dispatch("orphan").await;

        assert_eq!(result, Err(Error::NotRegistered("orphan".to_string())));
        assert!(!scheduler.is_pending("orphan"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_allows_reschedule() {
        let (runner, scheduler, _probe) = setup(false);
        let name = CacheName::new("feed");

        scheduler.schedule_once(&name).unwrap();
        let first = scheduler.pending_job("feed").unwrap();

        tokio::time::advance(Duration::from_secs(601)).await;

        assert!(scheduler.schedule_once(&name).unwrap());
        let second = scheduler.pending_job("feed").unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(runner.queued_len(), 2);
    }

    #[tokio::test]
    async fn test_schedulers_sharing_a_runner_keep_their_jobs() {
        let runner = Arc::new(SweepRunner::new());
        let first_registry = Arc::new(NamedCacheRegistry::new());
        let second_registry = Arc::new(NamedCacheRegistry::new());
        let first = RegenerationScheduler::new(
            runner.clone(),
            first_registry.clone(),
            SchedulerConfig::default(),
        );
        let second =
            RegenerationScheduler::new(runner.clone(), second_registry, SchedulerConfig::default());
        assert_ne!(first.hook(), second.hook());

        let probe = Arc::new(Probe {
            name: CacheName::new("feed"),
            calls: AtomicU32::new(0),
            fail: false,
        });
        first_registry.register(&probe).unwrap();

        first.schedule_once(&CacheName::new("feed")).unwrap();
        assert_eq!(runner.sweep().await, 1);

        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert!(!first.is_pending("feed"));
        assert!(!second.is_pending("feed"));
    }

    #[tokio::test]
    async fn test_runner_refusal_rolls_back_pending() {
        let registry = Arc::new(NamedCacheRegistry::new());
        let scheduler =
            RegenerationScheduler::new(Arc::new(RefusingRunner), registry, SchedulerConfig::default());
        let name = CacheName::new("feed");

        assert!(matches!(
            scheduler.schedule_once(&name),
            Err(Error::ScheduleError(_))
        ));
        assert!(!scheduler.is_pending("feed"));
    }
}
