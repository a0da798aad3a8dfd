//! Record lifecycle events.
//!
//! Derived caches keep themselves coherent with the records they were
//! built from by subscribing here. The host publishes a [`RecordEvent`]
//! whenever it saves or deletes a record; subscribers for that record
//! type run in subscription order.

use crate::error::Result;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A change to a stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordEvent {
    Saved { record_type: String, id: String },
    Deleted { record_type: String, id: String },
}

impl RecordEvent {
    pub fn saved(record_type: impl Into<String>, id: impl Into<String>) -> Self {
        RecordEvent::Saved {
            record_type: record_type.into(),
            id: id.into(),
        }
    }

    pub fn deleted(record_type: impl Into<String>, id: impl Into<String>) -> Self {
        RecordEvent::Deleted {
            record_type: record_type.into(),
            id: id.into(),
        }
    }

    pub fn record_type(&self) -> &str {
        match self {
            RecordEvent::Saved { record_type, .. } | RecordEvent::Deleted { record_type, .. } => {
                record_type
            }
        }
    }

    pub fn id(&self) -> &str {
        match self {
            RecordEvent::Saved { id, .. } | RecordEvent::Deleted { id, .. } => id,
        }
    }
}

/// Callback run for each event of a subscribed record type.
pub type EventHandler = Arc<dyn Fn(RecordEvent) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fan-out of record events to per-type subscribers.
#[derive(Default)]
pub struct EventBus {
    handlers: DashMap<String, Vec<(SubscriptionId, EventHandler)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, record_type: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .entry(record_type.to_string())
            .or_default()
            .push((id, handler));
        debug!("Subscribed to {} events ({:?})", record_type, id);
        id
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for mut entry in self.handlers.iter_mut() {
            let before = entry.len();
            entry.retain(|(sub, _)| *sub != id);
            removed |= entry.len() != before;
        }
        self.handlers.retain(|_, subs| !subs.is_empty());
        removed
    }

    /// Deliver an event to every subscriber of its record type.
    ///
    /// All subscribers run even if one fails.
    ///
    /// # Errors
    /// Returns the first subscriber error.
    pub async fn publish(&self, event: RecordEvent) -> Result<()> {
        // Snapshot so handlers may subscribe or unsubscribe while running.
        let handlers: Vec<EventHandler> = self
            .handlers
            .get(event.record_type())
            .map(|subs| subs.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        debug!(
            "» Publishing {:?} to {} subscriber(s)",
            event,
            handlers.len()
        );

        let mut first_error = None;
        for handler in handlers {
            if let Err(e) = handler(event.clone()).await {
                warn!("Subscriber failed on {:?}: {}", event, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn handler_count(&self, record_type: &str) -> usize {
        self.handlers
            .get(record_type)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}
