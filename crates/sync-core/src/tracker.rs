//! Recently-applied cache used for loop suppression.
//!
//! When the engine writes remote content into the vault, the watcher fires a
//! Modify for that same content. When it uploads local content, the push
//! channel echoes the change back. Both echoes carry an `(id, hash)` pair the
//! engine has just handled; this cache remembers those pairs briefly.
//!
//! Entries expire after `ENTRY_TTL` so a dropped echo never suppresses a real
//! edit later on.

use std::collections::HashMap;
use std::time::Duration;
use web_time::Instant;

use crate::record::{ContentHash, FileId};

/// Time-to-live for cache entries.
pub const ENTRY_TTL: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct RecentlyApplied {
    entries: HashMap<(FileId, ContentHash), Instant>,
    ttl: Duration,
}

impl Default for RecentlyApplied {
    fn default() -> Self {
        Self::with_ttl(ENTRY_TTL)
    }
}

impl RecentlyApplied {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Remember that `(id, hash)` was just applied by us.
    pub fn mark(&mut self, id: FileId, hash: ContentHash) {
        self.cleanup_expired();
        self.entries.insert((id, hash), Instant::now());
    }

    /// True if `(id, hash)` was marked and has not expired yet.
    ///
    /// Entries are not consumed: one write can echo more than once (editors
    /// emit several modify events per save).
    pub fn contains(&self, id: FileId, hash: &ContentHash) -> bool {
        self.entries
            .get(&(id, hash.clone()))
            .map(|marked_at| marked_at.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    /// Forget everything recorded for `id`.
    pub fn forget(&mut self, id: FileId) {
        self.entries.retain(|(entry_id, _), _| *entry_id != id);
    }

    /// Remove expired entries to bound memory.
    pub fn cleanup_expired(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, marked_at| marked_at.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
