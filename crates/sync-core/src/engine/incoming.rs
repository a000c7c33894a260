//! Handlers for notifications arriving on the push channel.

use tracing::{debug, info};

use super::{Result, SyncEngine};
use crate::change::RemoteNotification;
use crate::events::SyncEvent;
use crate::fs::{normalize_path, validate_sync_path, FileSystem, FsError};
use crate::push::PushChannel;
use crate::record::{ContentHash, FileId, FileRecord};
use crate::remote::RemoteStore;

impl<F: FileSystem, R: RemoteStore, P: PushChannel> SyncEngine<F, R, P> {
    pub(super) async fn on_remote_notification(
        &mut self,
        notification: RemoteNotification,
    ) -> Result<()> {
        // Our own change: already applied, and possibly stale by now
        if notification.origin() == Some(self.push.participant_id()) {
            debug!("Ignoring our own {} broadcast for id {}", notification.kind(), notification.id());
            return Ok(());
        }

        match notification {
            RemoteNotification::Created { record, .. } | RemoteNotification::Updated { record, .. } => {
                self.on_remote_upsert(record).await
            }
            RemoteNotification::Deleted { id, workspace_path, .. } => {
                self.on_remote_deleted(id, &workspace_path).await
            }
            RemoteNotification::Renamed { record, old_path, .. } => {
                self.on_remote_renamed(record, &old_path).await
            }
        }
    }

    async fn on_remote_upsert(&mut self, record: FileRecord) -> Result<()> {
        let path = remote_path(&record.workspace_path)?;
        let mapped = self.identity.path_of(record.id).map(str::to_owned);
        let same_path = mapped.as_deref() == Some(path.as_str());

        if same_path && self.recent.contains(record.id, &ContentHash::from(record.hash.as_str())) {
            debug!("Ignoring already applied {} (id {})", path, record.id);
            return Ok(());
        }

        // Moved remotely without us seeing the rename
        if let Some(old_path) = mapped.filter(|old| *old != path) {
            if self.fs.exists(&old_path).await? {
                self.fs.rename(&old_path, &path).await?;
            }
            self.identity.rename(&old_path, &path);
        }

        self.download(&record).await?;
        Ok(())
    }

    async fn on_remote_deleted(&mut self, id: FileId, workspace_path: &str) -> Result<()> {
        let Some(path) = self.identity.path_of(id).map(str::to_owned) else {
            debug!("Delete for unknown id {} ({}), ignoring", id, workspace_path);
            return Ok(());
        };

        self.remove_local(&path).await?;
        self.identity.remove_id(id);
        self.recent.forget(id);
        info!("Deleted {} locally (id {})", path, id);
        self.events.emit(SyncEvent::FileDeleted { path, side: "local" });
        Ok(())
    }

    async fn on_remote_renamed(&mut self, record: FileRecord, old_path: &str) -> Result<()> {
        let new_path = remote_path(&record.workspace_path)?;
        if self.identity.get(&new_path) == Some(record.id) {
            debug!("Rename to {} already applied", new_path);
            return Ok(());
        }

        let current = self
            .identity
            .path_of(record.id)
            .map(str::to_owned)
            .unwrap_or_else(|| normalize_path(old_path));

        if self.identity.get(&current) == Some(record.id) && self.fs.exists(&current).await? {
            self.fs.rename(&current, &new_path).await?;
            self.identity.rename(&current, &new_path);
            info!("Renamed {} -> {} locally (id {})", current, new_path, record.id);
            self.events.emit(SyncEvent::FileRenamed {
                from: current,
                to: new_path,
                id: record.id,
            });
            return Ok(());
        }

        // Nothing to move: fetch the content at its new location
        self.identity.remove_id(record.id);
        self.download(&record).await?;
        Ok(())
    }

    /// Bring the vault copy of `record` up to date.
    ///
    /// Returns `false` when the local file already had the remote content.
    pub(super) async fn download(&mut self, record: &FileRecord) -> Result<bool> {
        let path = remote_path(&record.workspace_path)?;

        match self.fs.read(&path).await {
            Ok(local) if ContentHash::from_bytes(&local).matches(&record.hash) => {
                self.identity.put(&path, record.id);
                return Ok(false);
            }
            Ok(_) | Err(FsError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let content = self.remote.fetch_file(record.id).await?;
        self.note_remote_ok();

        // Mark before writing so the watcher echo is recognised
        self.remember(record.id, &record.hash, &content);
        self.fs.write(&path, &content).await?;
        self.identity.put(&path, record.id);
        info!("Downloaded {} (id {})", path, record.id);
        self.events.emit(SyncEvent::FileDownloaded {
            path,
            id: record.id,
        });
        Ok(true)
    }

    /// Delete a vault file, tolerating one that is already gone.
    pub(super) async fn remove_local(&self, path: &str) -> Result<()> {
        match self.fs.delete(path).await {
            Ok(()) | Err(FsError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Vault path for a remote-supplied `workspace_path`.
///
/// Fails with `FsError::InvalidPath` for anything that could land outside
/// the vault.
pub(super) fn remote_path(workspace_path: &str) -> Result<String> {
    validate_sync_path(workspace_path)?;
    Ok(normalize_path(workspace_path))
}
