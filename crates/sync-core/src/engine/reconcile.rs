//! Reconciliation: full diff of the vault against the remote listing.
//!
//! Runs at startup and whenever the push channel reconnects. Policy:
//!
//! - deferred local events are replayed first, so edits made during an
//!   outage reach the remote before the diff is taken
//! - tracked ids that vanished remotely were deleted remotely: delete locally
//! - tracked ids whose remote path changed were renamed remotely: move locally
//! - remote only: download
//! - local only: create remotely
//! - both, same content: just record the id
//! - both, different content: remote wins

use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

use super::incoming::remote_path;
use super::{EngineError, Result, SyncEngine};
use crate::events::SyncEvent;
use crate::fs::{normalize_path, FileSystem};
use crate::push::PushChannel;
use crate::record::FileId;
use crate::remote::{RemoteError, RemoteStore};

/// Outcome of a reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Remote-only files written into the vault
    pub downloaded: Vec<String>,
    /// Local-only files created remotely
    pub uploaded: Vec<String>,
    /// Files present on both sides whose local content was replaced
    pub overwritten: Vec<String>,
    /// Files present on both sides with identical content
    pub matched: Vec<String>,
    /// Tracked files deleted locally because the remote dropped them
    pub dropped: Vec<String>,
    /// Tracked files moved locally to follow a remote rename
    pub moved: Vec<(String, String)>,
    /// Deferred local events replayed before the diff
    pub replayed: usize,
}

impl ReconcileReport {
    /// Check if any changes were made
    pub fn has_changes(&self) -> bool {
        !self.downloaded.is_empty()
            || !self.uploaded.is_empty()
            || !self.overwritten.is_empty()
            || !self.dropped.is_empty()
            || !self.moved.is_empty()
            || self.replayed > 0
    }
}

impl<F: FileSystem, R: RemoteStore, P: PushChannel> SyncEngine<F, R, P> {
    /// Run a reconciliation pass.
    ///
    /// Per-file filesystem errors are logged and skipped; a remote failure
    /// aborts the pass and is returned.
    pub async fn reconcile(&mut self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport {
            replayed: self.replay_deferred().await?,
            ..Default::default()
        };

        let records = self.remote.list_files(self.workspace_id).await?;
        self.note_remote_ok();

        let mut local: BTreeSet<String> = self
            .fs
            .list()
            .await?
            .iter()
            .map(|path| normalize_path(path))
            .collect();
        let remote_ids: HashSet<FileId> = records.iter().map(|r| r.id).collect();

        // Tracked ids the remote no longer has
        let vanished: Vec<FileId> = self
            .identity
            .ids()
            .filter(|id| !remote_ids.contains(id))
            .collect();
        for id in vanished {
            let Some(path) = self.identity.remove_id(id) else {
                continue;
            };
            self.recent.forget(id);
            let result = self.remove_local(&path).await;
            if self.absorb(result, &path)? {
                local.remove(&path);
                self.events.emit(SyncEvent::FileDeleted {
                    path: path.clone(),
                    side: "local",
                });
                report.dropped.push(path);
            }
        }

        for record in &records {
            let path = match remote_path(&record.workspace_path) {
                Ok(path) => path,
                Err(e) => {
                    warn!("Skipping remote file {}: {}", record.id, e);
                    continue;
                }
            };

            // Tracked under another path: renamed remotely
            if let Some(old_path) = self.identity.path_of(record.id).map(str::to_owned) {
                if old_path != path && local.contains(&old_path) && !local.contains(&path) {
                    let result = self.fs.rename(&old_path, &path).await.map_err(EngineError::from);
                    if self.absorb(result, &old_path)? {
                        local.remove(&old_path);
                        local.insert(path.clone());
                        self.identity.rename(&old_path, &path);
                        report.moved.push((old_path, path.clone()));
                    }
                }
            }

            let existed = local.contains(&path);
            let result = self.download(record).await;
            match self.absorb_value(result, &path)? {
                Some(true) if existed => report.overwritten.push(path),
                Some(true) => report.downloaded.push(path),
                Some(false) => report.matched.push(path),
                None => {}
            }
        }

        let remote_paths: HashSet<String> = records
            .iter()
            .map(|r| normalize_path(&r.workspace_path))
            .collect();
        for path in local.iter().filter(|p| !remote_paths.contains(*p)) {
            if self.identity.get(path).is_some() {
                continue;
            }
            let content = match self.fs.read(path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("Skipping {} during reconciliation: {}", path, e);
                    continue;
                }
            };
            let result = self.upload_new(path, content).await;
            if self.absorb(result, path)? {
                report.uploaded.push(path.clone());
            }
        }

        if report.has_changes() {
            info!(
                "Reconciled: {} downloaded, {} uploaded, {} overwritten, {} dropped, {} moved",
                report.downloaded.len(),
                report.uploaded.len(),
                report.overwritten.len(),
                report.dropped.len(),
                report.moved.len()
            );
        } else {
            debug!("Reconciled: vault already in sync ({} files)", report.matched.len());
        }
        self.events.emit(SyncEvent::Reconciled {
            downloaded: report.downloaded.len(),
            uploaded: report.uploaded.len(),
            overwritten: report.overwritten.len(),
            dropped: report.dropped.len(),
        });

        Ok(report)
    }

    /// Replay local events that failed while the remote was unreachable.
    ///
    /// Stops at the first transient or credential failure, keeping that
    /// event and the rest queued in order. Any other failure drops the
    /// event: retrying it would fail the same way on every pass.
    async fn replay_deferred(&mut self) -> Result<usize> {
        let mut pending = std::mem::take(&mut self.deferred);
        let mut replayed = 0;

        while let Some(event) = pending.pop_front() {
            match self.on_local_event(event.clone()).await {
                Ok(()) => replayed += 1,
                Err(err) if err.is_transient() || err.is_unauthorized() => {
                    pending.push_front(event);
                    self.deferred = pending;
                    return Err(err);
                }
                Err(err) => warn!("Dropping deferred {:?}: {}", event, err),
            }
        }

        if replayed > 0 {
            info!("Replayed {} deferred local event(s)", replayed);
        }
        Ok(replayed)
    }

    /// Keep per-file failures from aborting the pass.
    ///
    /// Returns `Ok(true)` on success, `Ok(false)` for a skipped file, and
    /// `Err` for failures that must stop the pass.
    fn absorb(&self, result: Result<()>, path: &str) -> Result<bool> {
        Ok(self.absorb_value(result, path)?.is_some())
    }

    fn absorb_value<T>(&self, result: Result<T>, path: &str) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(EngineError::Fs(e)) => {
                warn!("Skipping {} during reconciliation: {}", path, e);
                Ok(None)
            }
            Err(EngineError::Remote(e @ (RemoteError::Conflict(_) | RemoteError::NotFound(_)))) => {
                debug!("Skipping {} during reconciliation: {}", path, e);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
