//! File watcher for vault changes.
//!
//! Maps raw `notify` events onto the engine's `LocalEvent`s. Renames are
//! only reported when the platform pairs both paths (`RenameMode::Both`);
//! half-renames are left to the next reconciliation.

use anyhow::{Context, Result};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use sync_core::change::LocalEvent;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Track last seen mtime to filter spurious events (Docker volume bug workaround)
type MtimeCache = Arc<Mutex<HashMap<String, SystemTime>>>;

/// File watcher that monitors the vault directory.
pub struct FileWatcher {
    /// Vault base path
    vault_path: PathBuf,
    /// Watcher handle (must keep alive)
    _watcher: RecommendedWatcher,
    /// Receiver for file events
    event_rx: mpsc::UnboundedReceiver<LocalEvent>,
}

impl FileWatcher {
    /// Start watching `vault_path` recursively.
    pub fn new(vault_path: PathBuf) -> Result<Self> {
        // Canonicalize the path to resolve symlinks. On macOS, /var/folders/...
        // is actually /private/var/folders/..., and FSEvents needs the real path.
        let vault_path = vault_path.canonicalize().unwrap_or(vault_path);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let root = vault_path.clone();
        let mtime_cache: MtimeCache = Arc::new(Mutex::new(HashMap::new()));

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    for local in map_event(&event, &root, &mtime_cache) {
                        if event_tx.send(local).is_err() {
                            // Receiver dropped
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            }
        })
        .context("Failed to create file watcher")?;

        watcher
            .watch(&vault_path, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", vault_path.display()))?;

        Ok(Self {
            vault_path,
            _watcher: watcher,
            event_rx,
        })
    }

    /// Get the receiver for file events.
    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<LocalEvent> {
        &mut self.event_rx
    }

    /// Get the vault path.
    pub fn vault_path(&self) -> &Path {
        &self.vault_path
    }
}

/// Vault-relative, slash separated path, or `None` for paths outside the
/// vault and hidden entries.
fn relative_path(path: &Path, vault_path: &Path) -> Option<String> {
    let relative = path.strip_prefix(vault_path).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component.as_os_str().to_str()?;
        if part.starts_with('.') {
            return None;
        }
        parts.push(part);
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Convert one raw event into zero or more engine events.
fn map_event(event: &Event, vault_path: &Path, mtime_cache: &MtimeCache) -> Vec<LocalEvent> {
    let paths = &event.paths;

    let mapped = match &event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => paths
            .first()
            .filter(|path| path.is_file())
            .and_then(|path| relative_path(path, vault_path))
            .map(|rel| {
                remember_mtime(mtime_cache, vault_path, &rel);
                vec![LocalEvent::create(&rel)]
            })
            .unwrap_or_default(),

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => {
            map_rename(&paths[0], &paths[1], vault_path, mtime_cache)
        }

        // Paired renames are reported again as `Both`
        EventKind::Modify(ModifyKind::Name(RenameMode::From | RenameMode::To)) => Vec::new(),

        EventKind::Modify(ModifyKind::Name(_)) => paths
            .first()
            .and_then(|path| {
                let rel = relative_path(path, vault_path)?;
                if path.is_file() {
                    Some(LocalEvent::create(&rel))
                } else if !path.exists() {
                    forget_mtime(mtime_cache, &rel);
                    Some(LocalEvent::delete(&rel))
                } else {
                    None
                }
            })
            .into_iter()
            .collect(),

        EventKind::Modify(_) => paths
            .first()
            .filter(|path| path.is_file())
            .and_then(|path| relative_path(path, vault_path))
            .filter(|rel| mtime_changed(mtime_cache, vault_path, rel))
            .map(|rel| vec![LocalEvent::modify(&rel)])
            .unwrap_or_default(),

        EventKind::Remove(RemoveKind::Folder) => Vec::new(),
        EventKind::Remove(_) => paths
            .first()
            .and_then(|path| relative_path(path, vault_path))
            .map(|rel| {
                forget_mtime(mtime_cache, &rel);
                vec![LocalEvent::delete(&rel)]
            })
            .unwrap_or_default(),

        // Ignore access events and other event types
        _ => Vec::new(),
    };

    for local in &mapped {
        debug!("File event: {:?}", local);
    }
    mapped
}

/// A renamed directory moves every file below it.
fn map_rename(
    from: &Path,
    to: &Path,
    vault_path: &Path,
    mtime_cache: &MtimeCache,
) -> Vec<LocalEvent> {
    let Some(new_rel) = relative_path(to, vault_path) else {
        // Moved into a hidden location: gone as far as sync is concerned
        return relative_path(from, vault_path)
            .map(|rel| vec![LocalEvent::delete(&rel)])
            .unwrap_or_default();
    };
    let Some(old_rel) = relative_path(from, vault_path) else {
        return if to.is_file() {
            vec![LocalEvent::create(&new_rel)]
        } else {
            Vec::new()
        };
    };

    if to.is_file() {
        forget_mtime(mtime_cache, &old_rel);
        remember_mtime(mtime_cache, vault_path, &new_rel);
        return vec![LocalEvent::rename(&old_rel, &new_rel)];
    }

    let mut files = Vec::new();
    collect_files(to, &mut files);
    files
        .iter()
        .filter_map(|file| {
            let rel = file.strip_prefix(to).ok()?.to_str()?.replace('\\', "/");
            Some(LocalEvent::rename(
                &format!("{}/{}", old_rel, rel),
                &format!("{}/{}", new_rel, rel),
            ))
        })
        .collect()
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else if path.is_file() {
            out.push(path);
        }
    }
}

fn file_mtime(vault_path: &Path, rel: &str) -> Option<SystemTime> {
    std::fs::metadata(vault_path.join(rel)).ok()?.modified().ok()
}

/// True unless the file's mtime matches the last one seen.
fn mtime_changed(mtime_cache: &MtimeCache, vault_path: &Path, rel: &str) -> bool {
    let Some(mtime) = file_mtime(vault_path, rel) else {
        return true;
    };
    let mut cache = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());
    if cache.get(rel) == Some(&mtime) {
        // Mtime unchanged - spurious event, skip it
        return false;
    }
    cache.insert(rel.to_string(), mtime);
    true
}

fn remember_mtime(mtime_cache: &MtimeCache, vault_path: &Path, rel: &str) {
    if let Some(mtime) = file_mtime(vault_path, rel) {
        mtime_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(rel.to_string(), mtime);
    }
}

fn forget_mtime(mtime_cache: &MtimeCache, rel: &str) {
    mtime_cache
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(rel);
}
