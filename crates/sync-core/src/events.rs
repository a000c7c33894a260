//! Event infrastructure for sync-core.
//!
//! Provides `SyncEvent` for monitoring and user-facing notices, and
//! `EventBus` for subscriptions. Wrap the bus in `Arc` to subscribe.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::record::FileId;

/// Events emitted by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// Local content was pushed to the remote store.
    FileUploaded { path: String, id: FileId },
    /// Remote content was written into the vault.
    FileDownloaded { path: String, id: FileId },
    /// A file was deleted on one side to mirror the other.
    FileDeleted {
        path: String,
        /// "local" when the vault side was deleted, "remote" otherwise
        side: &'static str,
    },
    /// A file moved, id preserved.
    FileRenamed {
        from: String,
        to: String,
        id: FileId,
    },
    /// A create race was settled in favour of the remote file.
    ConflictResolved { path: String, id: FileId },
    /// A reconciliation pass finished.
    Reconciled {
        downloaded: usize,
        uploaded: usize,
        overwritten: usize,
        dropped: usize,
    },
    /// The remote became unreachable; emitted once per outage.
    Paused { reason: String },
    /// The remote is reachable again.
    Resumed,
    /// Credentials were rejected; sync stopped until reconfigured.
    Halted { reason: String },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
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

type Callback = Arc<dyn Fn(SyncEvent) + Send + Sync>;

/// Event bus for publishing sync events to subscribers.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SyncEvent) + Send + Sync + 'static,
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
        // try_write: Drop may run during unwinding while emit holds a read lock
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SyncEvent) {
        // Clone the list so a callback may subscribe without deadlocking
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
