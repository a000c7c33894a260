//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use sync_core::fs::{normalize_path, validate_sync_path, FileSystem, FsError, Result};
use tokio::fs;

/// Native filesystem rooted at the vault directory.
///
/// Paths are vault-relative and slash separated. Hidden entries (names
/// starting with `.`) are not listed, so editor state such as `.obsidian/`
/// never reaches the remote.
pub struct NativeFs {
    base_path: PathBuf,
}

impl NativeFs {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Absolute path for a vault-relative one. Paths that would resolve
    /// outside `base_path` are refused.
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Ok(self.base_path.clone());
        }
        validate_sync_path(&path)?;
        Ok(self.base_path.join(path))
    }

    async fn ensure_parent(full_path: &Path, path: &str) -> Result<()> {
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(path, e))?;
        }
        Ok(())
    }
}

fn io_error(path: &str, e: std::io::Error) -> FsError {
    match e.kind() {
        ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        _ => FsError::Io(format!("{}: {}", path, e)),
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.full_path(path)?)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let full_path = self.full_path(path)?;
        Self::ensure_parent(&full_path, path).await?;
        fs::write(&full_path, content)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        fs::remove_file(self.full_path(path)?)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut pending = vec![String::new()];

        while let Some(dir_path) = pending.pop() {
            let mut dir = fs::read_dir(self.full_path(&dir_path)?)
                .await
                .map_err(|e| io_error(&dir_path, e))?;

            while let Some(entry) = dir
                .next_entry()
                .await
                .map_err(|e| io_error(&dir_path, e))?
            {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                let path = if dir_path.is_empty() {
                    name
                } else {
                    format!("{}/{}", dir_path, name)
                };
                // Names the rest of the sync could not address
                if validate_sync_path(&path).is_err() {
                    continue;
                }
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| io_error(&path, e))?;

                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    files.push(path);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        fs::try_exists(self.full_path(path)?)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.full_path(from)?;
        let target = self.full_path(to)?;
        Self::ensure_parent(&target, to).await?;
        fs::rename(source, &target)
            .await
            .map_err(|e| io_error(from, e))
    }
}
