//! FileSystem trait abstraction over the local vault's bytes.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in sync-daemon) - Uses tokio::fs
//!
//! All paths are vault-relative and slash separated.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Local storage adapter for the vault.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write file contents (creates parent directories if needed)
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Delete a file
    async fn delete(&self, path: &str) -> Result<()>;

    /// List every file in the vault, recursively, as relative paths
    async fn list(&self) -> Result<Vec<String>>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Move a file (creates parent directories of `to` if needed)
    async fn rename(&self, from: &str, to: &str) -> Result<()>;
}

/// Normalize a vault path: strip leading/trailing slashes, use `/` separators.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}

/// Longest vault path accepted from the remote side.
pub const MAX_PATH_LEN: usize = 1024;

/// Check that a vault-relative path stays inside the vault.
///
/// Applied to every path the remote side hands us before it reaches the
/// filesystem.
pub fn validate_sync_path(path: &str) -> Result<()> {
    let reject = |reason| {
        Err(FsError::InvalidPath {
            path: path.to_string(),
            reason,
        })
    };

    if path.is_empty() {
        return reject("empty path");
    }
    if path.len() > MAX_PATH_LEN {
        return reject("path too long");
    }
    if path.starts_with('/') {
        return reject("absolute path");
    }
    // Windows drive letter (C:...)
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return reject("absolute path");
    }
    if path.contains('\\') {
        return reject("backslash in path");
    }
    if path.chars().any(|c| c.is_control()) {
        return reject("control character in path");
    }
    for segment in path.split('/') {
        match segment {
            "" => return reject("empty path segment"),
            "." | ".." => return reject("path traversal"),
            _ => {}
        }
    }
    Ok(())
}

/// Parent directory of a vault path, `None` for entries at the vault root.
pub fn parent_path(path: &str) -> Option<String> {
    let normalized = normalize_path(path);
    normalized.rfind('/').map(|pos| normalized[..pos].to_string())
}

/// Final component of a vault path.
pub fn file_name(path: &str) -> String {
    let normalized = normalize_path(path);
    match normalized.rfind('/') {
        Some(pos) => normalized[pos + 1..].to_string(),
        None => normalized,
    }
}

/// In-memory filesystem for testing
#[derive(Default)]
pub struct InMemoryFs {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file without going through the async API.
    pub fn insert(&self, path: &str, content: &[u8]) {
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(normalize_path(path), content.to_vec());
    }

    /// Snapshot of a file's content, if present.
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&normalize_path(path))
            .cloned()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize_path(path);
        self.get(&path).ok_or(FsError::NotFound(path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        self.insert(path, content);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.remove(&path).map(|_| ()).ok_or(FsError::NotFound(path))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        Ok(files.keys().cloned().collect())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.get(path).is_some())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = normalize_path(from);
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        let content = files.remove(&from).ok_or(FsError::NotFound(from))?;
        files.insert(normalize_path(to), content);
        Ok(())
    }
}

// Implement FileSystem for Arc<T> where T: FileSystem
// This lets tests keep a handle on the store the engine writes into
#[async_trait]
impl<T: FileSystem + Send + Sync> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        (**self).list().await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        (**self).rename(from, to).await
    }
}
