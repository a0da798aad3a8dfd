//! Deferred job runners.
//!
//! A [`DeferredJobRunner`] runs named one-shot jobs at or after a given
//! time. Jobs carry a string argument and are bound to handlers by hook
//! name, because the runner may dispatch long after, and far away from,
//! the code that scheduled them.
//!
//! [`SweepRunner`] is the in-process implementation: jobs sit in a queue
//! until something calls [`SweepRunner::sweep`], either a host tick or the
//! ticker started by [`SweepRunner::spawn`].

use crate::error::Result;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Callback invoked with a job's argument when it fires.
pub type JobHandler = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Host-provided scheduler of one-shot deferred jobs.
///
/// Runners promise at-least-once invocation after `run_at`, with no upper
/// bound on the delay.
pub trait DeferredJobRunner: Send + Sync {
    /// Bind `hook` to a handler, replacing any previous binding.
    fn register(&self, hook: &str, handler: JobHandler);

    /// Queue a single run of `hook` with `arg`, due at `run_at`.
    fn schedule_once(&self, hook: &str, arg: &str, run_at: Instant) -> Result<()>;
}

/// A queued job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub hook: String,
    pub arg: String,
    pub run_at: Instant,
}

/// In-process [`DeferredJobRunner`] driven by explicit sweeps.
#[derive(Default)]
pub struct SweepRunner {
    queue: Mutex<Vec<ScheduledJob>>,
    handlers: DashMap<String, JobHandler>,
}

impl SweepRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of queued jobs, in scheduling order.
    pub fn queued(&self) -> Vec<ScheduledJob> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of queued jobs.
    pub fn queued_len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run every job that is due. Returns how many were taken off the queue.
    ///
    /// Handlers run one after another on the calling task. Jobs scheduled
    /// while a sweep is running wait for the next sweep.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let due: Vec<ScheduledJob> = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let (due, later): (Vec<_>, Vec<_>) =
                queue.drain(..).partition(|job| job.run_at <= now);
            *queue = later;
            due
        };

        let count = due.len();
        for job in due {
            let handler = self.handlers.get(&job.hook).map(|h| h.value().clone());
            match handler {
                Some(handler) => {
                    debug!("» Dispatching job {} ({})", job.hook, job.arg);
                    handler(job.arg).await;
                }
                None => warn!("Dropping job {} ({}): no handler registered", job.hook, job.arg),
            }
        }

        if count > 0 {
            debug!("Sweep dispatched {} job(s)", count);
        }
        count
    }

    /// Sweep on a fixed interval from a background tokio task.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        info!("✓ Job sweeper started (interval: {:?})", interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}

impl DeferredJobRunner for SweepRunner {
    fn register(&self, hook: &str, handler: JobHandler) {
        self.handlers.insert(hook.to_string(), handler);
    }

    fn schedule_once(&self, hook: &str, arg: &str, run_at: Instant) -> Result<()> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ScheduledJob {
                hook: hook.to_string(),
                arg: arg.to_string(),
                run_at,
            });

        debug!("Scheduled job {} ({})", hook, arg);
        Ok(())
    }
}
