//! Handlers for local filesystem events.

use tracing::{debug, info};

use super::{Result, SyncEngine};
use crate::change::{LocalEvent, RemoteNotification};
use crate::events::SyncEvent;
use crate::fs::{normalize_path, FileSystem};
use crate::push::PushChannel;
use crate::record::{ContentHash, NewFile};
use crate::remote::{RemoteError, RemoteStore};

impl<F: FileSystem, R: RemoteStore, P: PushChannel> SyncEngine<F, R, P> {
    pub(super) async fn on_local_event(&mut self, event: LocalEvent) -> Result<()> {
        match event {
            LocalEvent::Create(file) => self.on_local_create(&file.path).await,
            LocalEvent::Modify(file) => self.on_local_modify(&file.path).await,
            LocalEvent::Delete(file) => self.on_local_delete(&file.path).await,
            LocalEvent::Rename { file, old_path } => {
                self.on_local_rename(&old_path, &file.path).await
            }
        }
    }

    async fn on_local_create(&mut self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        if self.identity.get(&path).is_some() {
            // Editors often fire create twice for one save
            debug!("Ignoring create for already tracked {}", path);
            return Ok(());
        }

        let content = self.fs.read(&path).await?;
        self.upload_new(&path, content).await
    }

    async fn on_local_modify(&mut self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        let Some(id) = self.identity.get(&path) else {
            debug!("Modify for untracked {}, treating as create", path);
            return self.on_local_create(&path).await;
        };

        let content = self.fs.read(&path).await?;
        if self.recent.contains(id, &ContentHash::from_bytes(&content)) {
            debug!("Skipping upload for {} (sync echo)", path);
            return Ok(());
        }

        match self.remote.update_file(id, &content).await {
            Ok(record) => {
                self.note_remote_ok();
                self.remember(record.id, &record.hash, &content);
                info!("Uploaded {} (id {})", path, id);
                self.events.emit(SyncEvent::FileUploaded {
                    path: path.clone(),
                    id,
                });
                self.announce(RemoteNotification::Updated {
                    origin: self.origin(),
                    record,
                })
                .await;
                Ok(())
            }
            Err(RemoteError::NotFound(_)) => {
                debug!("Remote lost id {} for {}, re-creating", id, path);
                self.identity.remove(&path);
                self.recent.forget(id);
                self.upload_new(&path, content).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn on_local_delete(&mut self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        let Some(id) = self.identity.get(&path) else {
            debug!("Delete for untracked {}, nothing to tell the remote", path);
            return Ok(());
        };

        self.delete_remote(id).await?;
        self.identity.remove(&path);
        self.recent.forget(id);
        info!("Deleted {} (id {}) remotely", path, id);
        self.events.emit(SyncEvent::FileDeleted {
            path: path.clone(),
            side: "remote",
        });
        self.announce(RemoteNotification::Deleted {
            origin: self.origin(),
            id,
            workspace_path: path,
        })
        .await;
        Ok(())
    }

    async fn on_local_rename(&mut self, old_path: &str, new_path: &str) -> Result<()> {
        let old_path = normalize_path(old_path);
        let new_path = normalize_path(new_path);
        let old_id = self.identity.get(&old_path);
        let new_id = self.identity.get(&new_path);

        let id = match (old_id, new_id) {
            (None, Some(_)) => {
                // We moved this file ourselves while applying a remote rename
                debug!("Ignoring rename echo {} -> {}", old_path, new_path);
                return Ok(());
            }
            (None, None) => {
                debug!("Rename of untracked {}, treating {} as create", old_path, new_path);
                return self.on_local_create(&new_path).await;
            }
            (Some(id), Some(existing)) if id == existing => return Ok(()),
            (Some(id), Some(replaced)) => {
                // The move overwrote another tracked file
                self.delete_remote(replaced).await?;
                self.identity.remove(&new_path);
                self.recent.forget(replaced);
                id
            }
            (Some(id), None) => id,
        };

        match self.remote.rename_file(id, &new_path).await {
            Ok(record) => {
                self.note_remote_ok();
                self.identity.rename(&old_path, &new_path);
                info!("Renamed {} -> {} (id {})", old_path, new_path, id);
                self.events.emit(SyncEvent::FileRenamed {
                    from: old_path.clone(),
                    to: new_path,
                    id,
                });
                self.announce(RemoteNotification::Renamed {
                    origin: self.origin(),
                    record,
                    old_path,
                })
                .await;
                Ok(())
            }
            Err(RemoteError::NotFound(_)) => {
                debug!("Remote lost id {} during rename, re-creating {}", id, new_path);
                self.identity.remove(&old_path);
                self.recent.forget(id);
                let content = self.fs.read(&new_path).await?;
                self.upload_new(&new_path, content).await
            }
            Err(RemoteError::Conflict(_)) => {
                // Another participant already owns the target path: the
                // remote file wins, and ours is gone from its old path
                self.delete_remote(id).await?;
                self.identity.remove(&old_path);
                self.recent.forget(id);
                self.adopt_remote(&new_path).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Register a new file remotely, resolving create races in favour of the
    /// remote copy.
    pub(super) async fn upload_new(&mut self, path: &str, content: Vec<u8>) -> Result<()> {
        let file = NewFile::new(self.workspace_id, path);
        match self.remote.create_file(&file, &content).await {
            Ok(record) => {
                self.note_remote_ok();
                self.remember(record.id, &record.hash, &content);
                self.identity.put(path, record.id);
                info!("Created {} remotely (id {})", path, record.id);
                self.events.emit(SyncEvent::FileUploaded {
                    path: path.to_string(),
                    id: record.id,
                });
                self.announce(RemoteNotification::Created {
                    origin: self.origin(),
                    record,
                })
                .await;
                Ok(())
            }
            Err(RemoteError::Conflict(_)) => {
                info!("{} already exists remotely, adopting remote copy", path);
                self.adopt_remote(path).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the local file at `path` with the remote one and take its id.
    async fn adopt_remote(&mut self, path: &str) -> Result<()> {
        let record = self
            .remote
            .find_by_path(self.workspace_id, path)
            .await?
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))?;
        let content = self.remote.fetch_file(record.id).await?;
        self.note_remote_ok();

        self.remember(record.id, &record.hash, &content);
        self.fs.write(path, &content).await?;
        self.identity.put(path, record.id);
        self.events.emit(SyncEvent::ConflictResolved {
            path: path.to_string(),
            id: record.id,
        });
        Ok(())
    }

    /// Delete remotely; an id the remote no longer knows is already gone.
    async fn delete_remote(&mut self, id: i64) -> Result<()> {
        match self.remote.delete_file(id).await {
            Ok(()) => {
                self.note_remote_ok();
                Ok(())
            }
            Err(RemoteError::NotFound(_)) => {
                debug!("Remote id {} was already gone", id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
