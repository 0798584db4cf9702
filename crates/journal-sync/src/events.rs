//! Engine events for logging and monitoring.
//!
//! `EventBus` fans events out to subscribers. Subscriptions follow the
//! disposer pattern: hold the `Subscription` to keep receiving, drop it to
//! stop.

use crate::clock::Millis;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Something the engine did that observers may care about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A reconciliation cycle finished.
    #[serde(rename_all = "camelCase")]
    SyncCompleted {
        adopted: usize,
        conflicts: usize,
        pushed: usize,
        timestamp: Millis,
    },
    /// A reconciliation cycle failed; the cache was not touched.
    SyncFailed { error: String, timestamp: Millis },
    /// Two diverging edits of one entry were concatenated.
    ConflictMerged { date: String, timestamp: Millis },
    /// A journal's subscription moved to a new state.
    #[serde(rename_all = "camelCase")]
    ListenerStateChanged { journal_id: String, state: String },
    /// A shared journal view was replaced.
    #[serde(rename_all = "camelCase")]
    SharedViewUpdated { journal_id: String, entries: usize },
    /// A notification request went to the dispatcher.
    #[serde(rename_all = "camelCase")]
    NotificationSent { journal_id: String, title: String },
}

type Callback = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Handle that unsubscribes when dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Publishes `SyncEvent`s. Wrap in `Arc` to subscribe.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run while emit holds the read lock.
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    pub fn emit(&self, event: SyncEvent) {
        // Snapshot so a callback may subscribe without deadlocking.
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
