//! SyncEngine: keeps a vault and a remote workspace converged.
//!
//! The engine is the single consumer of one merged input queue:
//!
//! 1. Local filesystem events (`EngineInput::Local`) are pushed to the
//!    remote store, then announced on the push channel
//! 2. Remote notifications (`EngineInput::Remote`) are applied to the vault
//! 3. `EngineInput::Reconnected` triggers a reconciliation pass, since the
//!    push channel may have missed notifications while it was down
//!
//! `handle` takes `&mut self`, so every Identity Map mutation happens
//! strictly one at a time. Map entries change only after the remote store
//! accepted the corresponding operation.
//!
//! Failure policy:
//! - `Conflict` / `NotFound` are resolved inline and never surface
//! - `Unreachable` pauses the engine (one `SyncEvent::Paused` per outage);
//!   local events are deferred and replayed by the next reconciliation
//! - `Unauthorized` halts the engine until it is rebuilt
//! - filesystem errors drop the event, no retry

mod incoming;
mod local;
mod reconcile;


pub use reconcile::ReconcileReport;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::change::{EngineInput, LocalEvent, RemoteNotification};
use crate::events::{EventBus, SyncEvent};
use crate::fs::{FileSystem, FsError};
use crate::identity::IdentityMap;
use crate::push::PushChannel;
use crate::record::{ContentHash, FileId};
use crate::remote::{RemoteError, RemoteStore};
use crate::tracker::RecentlyApplied;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Sync halted: workspace credentials were rejected")]
    Halted,

    #[error("Sync engine is shut down")]
    Stopped,

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),
}

impl EngineError {
    /// Failures that may clear up once the remote is reachable again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Remote(RemoteError::Unreachable(_))
                | EngineError::Remote(RemoteError::Deserialization(_))
        )
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, EngineError::Remote(RemoteError::Unauthorized))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Processing events normally
    Running,
    /// Remote unreachable; local events are deferred until reconnect
    Paused,
    /// Credentials rejected; all input is refused
    Halted,
    /// Shut down
    Stopped,
}

pub struct SyncEngine<F: FileSystem, R: RemoteStore, P: PushChannel> {
    fs: F,
    remote: R,
    push: P,
    workspace_id: i64,
    identity: IdentityMap,
    /// `(id, hash)` pairs we just applied, for echo suppression
    recent: RecentlyApplied,
    /// Local events that failed because the remote was unreachable
    deferred: VecDeque<LocalEvent>,
    status: EngineStatus,
    events: Arc<EventBus>,
}

impl<F: FileSystem, R: RemoteStore, P: PushChannel> SyncEngine<F, R, P> {
    pub fn new(fs: F, remote: R, push: P, workspace_id: i64) -> Self {
        Self {
            fs,
            remote,
            push,
            workspace_id,
            identity: IdentityMap::new(),
            recent: RecentlyApplied::new(),
            deferred: VecDeque::new(),
            status: EngineStatus::Running,
            events: Arc::new(EventBus::new()),
        }
    }

    /// Share an existing event bus instead of the engine's own.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    /// True while the engine is waiting for the remote to come back.
    pub fn is_paused(&self) -> bool {
        self.status == EngineStatus::Paused
    }

    pub fn workspace_id(&self) -> i64 {
        self.workspace_id
    }

    pub fn identity(&self) -> &IdentityMap {
        &self.identity
    }

    /// Read-only snapshot of the forward `path -> id` mapping.
    pub fn identity_snapshot(&self) -> BTreeMap<String, FileId> {
        self.identity.get_by_path()
    }

    /// Number of local events waiting for the remote to come back.
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn push(&self) -> &P {
        &self.push
    }

    /// Initial reconciliation against the remote listing.
    pub async fn start(&mut self) -> Result<ReconcileReport> {
        self.ensure_accepting()?;
        info!("Starting sync for workspace {}", self.workspace_id);
        match self.reconcile().await {
            Ok(report) => Ok(report),
            Err(err) => {
                self.record_failure(&err, "startup reconciliation");
                Err(err)
            }
        }
    }

    /// Process one input to completion.
    ///
    /// Per-event failures are classified and logged, not returned. `Err` is
    /// only returned when the engine refuses input (halted or stopped).
    pub async fn handle(&mut self, input: EngineInput) -> Result<()> {
        self.ensure_accepting()?;

        match input {
            EngineInput::Local(event) => {
                if self.status == EngineStatus::Paused {
                    debug!("Deferring {:?} while paused", event);
                    self.defer(event);
                    return Ok(());
                }
                if let Err(err) = self.on_local_event(event.clone()).await {
                    if err.is_transient() {
                        self.defer(event);
                    }
                    self.record_failure(&err, "local event");
                }
            }
            EngineInput::Remote(notification) => {
                let kind = notification.kind();
                if let Err(err) = self.on_remote_notification(notification).await {
                    self.record_failure(&err, kind);
                }
            }
            EngineInput::Reconnected => {
                info!("Push channel reconnected, reconciling");
                if let Err(err) = self.reconcile().await {
                    self.record_failure(&err, "reconciliation");
                }
            }
        }
        Ok(())
    }

    /// Stop accepting input and close the push channel.
    pub async fn shutdown(&mut self) {
        if self.status == EngineStatus::Stopped {
            return;
        }
        self.status = EngineStatus::Stopped;
        if !self.deferred.is_empty() {
            warn!(
                "Shutting down with {} deferred event(s); the next start will reconcile them",
                self.deferred.len()
            );
        }
        if let Err(e) = self.push.close().await {
            warn!("Failed to close push channel: {}", e);
        }
        info!("Sync engine stopped");
    }

    /// Queue a local event for replay.
    ///
    /// A create or modify replays by reading the file's current content, so
    /// a modify right behind another content event for the same path adds
    /// nothing.
    fn defer(&mut self, event: LocalEvent) {
        let last_for_path = self.deferred.iter().rev().find(|queued| queued.path() == event.path());
        if matches!(event, LocalEvent::Modify(_))
            && matches!(last_for_path, Some(LocalEvent::Create(_) | LocalEvent::Modify(_)))
        {
            debug!("{} already queued, not deferring again", event.path());
            return;
        }
        self.deferred.push_back(event);
    }

    fn ensure_accepting(&self) -> Result<()> {
        match self.status {
            EngineStatus::Halted => Err(EngineError::Halted),
            EngineStatus::Stopped => Err(EngineError::Stopped),
            EngineStatus::Running | EngineStatus::Paused => Ok(()),
        }
    }

    fn record_failure(&mut self, err: &EngineError, context: &str) {
        match err {
            EngineError::Remote(RemoteError::Unauthorized) => self.halt(),
            EngineError::Remote(RemoteError::Unreachable(reason)) => {
                warn!("Remote unreachable during {}: {}", context, reason);
                self.pause(reason);
            }
            EngineError::Remote(RemoteError::Deserialization(reason)) => {
                error!("Unexpected response during {}: {}", context, reason);
                self.pause(reason);
            }
            EngineError::Remote(other) => {
                debug!("Unresolved remote error during {}: {}", context, other);
            }
            EngineError::Fs(e) => {
                warn!("Dropping {} after filesystem error: {}", context, e);
            }
            EngineError::Halted | EngineError::Stopped => {}
        }
    }

    fn pause(&mut self, reason: &str) {
        if self.status != EngineStatus::Running {
            return;
        }
        self.status = EngineStatus::Paused;
        warn!("Sync paused, awaiting reconnect: {}", reason);
        self.events.emit(SyncEvent::Paused {
            reason: reason.to_string(),
        });
    }

    fn halt(&mut self) {
        if self.status == EngineStatus::Halted {
            return;
        }
        self.status = EngineStatus::Halted;
        self.deferred.clear();
        error!("Workspace credentials rejected, sync halted until reconfigured");
        self.events.emit(SyncEvent::Halted {
            reason: "workspace credentials rejected".to_string(),
        });
    }

    /// Called after a remote call succeeded.
    fn note_remote_ok(&mut self) {
        if self.status == EngineStatus::Paused {
            self.status = EngineStatus::Running;
            info!("Remote reachable again, sync resumed");
            self.events.emit(SyncEvent::Resumed);
        }
    }

    /// Remember content we just applied on either side, under both the
    /// remote digest and our own.
    fn remember(&mut self, id: FileId, remote_hash: &str, content: &[u8]) {
        self.recent.mark(id, ContentHash::from(remote_hash));
        let local = ContentHash::from_bytes(content);
        if !local.matches(remote_hash) {
            self.recent.mark(id, local);
        }
    }

    /// Best-effort broadcast of a local change.
    async fn announce(&self, notification: RemoteNotification) {
        if let Err(e) = self.push.broadcast(&notification).await {
            debug!("Broadcast of {} for {} failed: {}", notification.kind(), notification.id(), e);
        }
    }

    fn origin(&self) -> Option<String> {
        Some(self.push.participant_id().to_string())
    }
}
