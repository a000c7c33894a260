//! Change inputs consumed by the sync engine.
//!
//! Local changes come from the host's filesystem watcher, remote changes from
//! the push channel. Both are merged into one `EngineInput` queue.

use serde::{Deserialize, Serialize};

use crate::fs::{file_name, normalize_path, parent_path};
use crate::record::{FileId, FileRecord};

/// A vault entry as described by a filesystem event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// File name (final path component)
    pub name: String,
    /// Vault-relative path
    pub path: String,
    /// Owning folder, `None` for the vault root
    pub parent: Option<String>,
}

impl LocalFile {
    pub fn new(path: &str) -> Self {
        Self {
            name: file_name(path),
            path: normalize_path(path),
            parent: parent_path(path),
        }
    }
}

/// Filesystem event raised by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    Create(LocalFile),
    Modify(LocalFile),
    Delete(LocalFile),
    Rename { file: LocalFile, old_path: String },
}

impl LocalEvent {
    pub fn create(path: &str) -> Self {
        Self::Create(LocalFile::new(path))
    }

    pub fn modify(path: &str) -> Self {
        Self::Modify(LocalFile::new(path))
    }

    pub fn delete(path: &str) -> Self {
        Self::Delete(LocalFile::new(path))
    }

    pub fn rename(old_path: &str, new_path: &str) -> Self {
        Self::Rename {
            file: LocalFile::new(new_path),
            old_path: normalize_path(old_path),
        }
    }

    /// Path the event is about (the new path for renames).
    pub fn path(&self) -> &str {
        match self {
            Self::Create(file) | Self::Modify(file) | Self::Delete(file) => &file.path,
            Self::Rename { file, .. } => &file.path,
        }
    }
}

/// Change notification delivered over the push channel.
///
/// `origin` is the participant id of whoever made the change; changes made
/// by the server itself may leave it out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RemoteNotification {
    Created {
        #[serde(default)]
        origin: Option<String>,
        record: FileRecord,
    },
    Updated {
        #[serde(default)]
        origin: Option<String>,
        record: FileRecord,
    },
    Deleted {
        #[serde(default)]
        origin: Option<String>,
        id: FileId,
        workspace_path: String,
    },
    Renamed {
        #[serde(default)]
        origin: Option<String>,
        record: FileRecord,
        old_path: String,
    },
}

impl RemoteNotification {
    pub fn origin(&self) -> Option<&str> {
        match self {
            Self::Created { origin, .. }
            | Self::Updated { origin, .. }
            | Self::Deleted { origin, .. }
            | Self::Renamed { origin, .. } => origin.as_deref(),
        }
    }

    pub fn id(&self) -> FileId {
        match self {
            Self::Created { record, .. }
            | Self::Updated { record, .. }
            | Self::Renamed { record, .. } => record.id,
            Self::Deleted { id, .. } => *id,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Deleted { .. } => "deleted",
            Self::Renamed { .. } => "renamed",
        }
    }

    /// Encode as JSON for the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode from a JSON frame.
    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}

/// One item of the engine's single merged input queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineInput {
    Local(LocalEvent),
    Remote(RemoteNotification),
    /// The push channel reconnected and may have missed notifications
    Reconnected,
}

impl From<LocalEvent> for EngineInput {
    fn from(event: LocalEvent) -> Self {
        Self::Local(event)
    }
}

impl From<RemoteNotification> for EngineInput {
    fn from(notification: RemoteNotification) -> Self {
        Self::Remote(notification)
    }
}
