//! IdentityMap: bidirectional bookkeeping between vault paths and remote file ids.
//!
//! The forward (`path -> id`) and inverse (`id -> path`) maps are private and
//! only change together, so every entry in one has exactly one partner in the
//! other. Nothing here touches storage.

use std::collections::{BTreeMap, HashMap};

use crate::fs::normalize_path;
use crate::record::FileId;

#[derive(Debug, Default, Clone)]
pub struct IdentityMap {
    by_path: HashMap<String, FileId>,
    by_id: HashMap<FileId, String>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote id registered for `path`.
    pub fn get(&self, path: &str) -> Option<FileId> {
        self.by_path.get(&normalize_path(path)).copied()
    }

    /// Path currently registered for `id`.
    pub fn path_of(&self, id: FileId) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// Sorted snapshot of the forward mapping.
    pub fn get_by_path(&self) -> BTreeMap<String, FileId> {
        self.by_path
            .iter()
            .map(|(path, id)| (path.clone(), *id))
            .collect()
    }

    /// Register `path -> id`, last write wins.
    ///
    /// Any previous id at `path` and any previous path of `id` are dropped
    /// so the two maps stay a bijection.
    pub fn put(&mut self, path: &str, id: FileId) {
        let path = normalize_path(path);
        if let Some(old_id) = self.by_path.remove(&path) {
            self.by_id.remove(&old_id);
        }
        if let Some(old_path) = self.by_id.remove(&id) {
            self.by_path.remove(&old_path);
        }
        self.by_path.insert(path.clone(), id);
        self.by_id.insert(id, path);
    }

    /// Unregister `path`, returning the id it had.
    pub fn remove(&mut self, path: &str) -> Option<FileId> {
        let id = self.by_path.remove(&normalize_path(path))?;
        self.by_id.remove(&id);
        Some(id)
    }

    /// Unregister `id`, returning the path it had.
    pub fn remove_id(&mut self, id: FileId) -> Option<String> {
        let path = self.by_id.remove(&id)?;
        self.by_path.remove(&path);
        Some(path)
    }

    /// Re-key an entry, keeping its id. Returns the moved id, or `None`
    /// when `old_path` was not registered (the map is left untouched).
    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Option<FileId> {
        let id = self.remove(old_path)?;
        self.put(new_path, id);
        Some(id)
    }

    pub fn contains_id(&self, id: FileId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = FileId> + '_ {
        self.by_id.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// True when forward and inverse maps mirror each other exactly.
    pub fn is_consistent(&self) -> bool {
        self.by_path.len() == self.by_id.len()
            && self
                .by_path
                .iter()
                .all(|(path, id)| self.by_id.get(id) == Some(path))
    }
}
