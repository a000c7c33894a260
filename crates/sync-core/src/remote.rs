//! RemoteStore trait for the workspace's request/response API.
//!
//! Implementations:
//! - `InMemoryRemote` - For testing; records every call
//! - `HttpRemoteStore` (in sync-daemon) - Uses reqwest
//!
//! Failures are classified into `RemoteError` so the engine can decide
//! between inline resolution, pausing, and halting without looking at
//! transport details.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::fs::normalize_path;
use crate::record::{ContentHash, FileId, FileRecord, NewFile};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Identity collision (e.g. the path already exists remotely)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stale id reference
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transport failure, retries already exhausted
    #[error("Remote unreachable: {0}")]
    Unreachable(String),

    /// Credentials rejected; fatal for the session
    #[error("Unauthorized")]
    Unauthorized,

    /// Response body did not match the expected shape
    #[error("Invalid response: {0}")]
    Deserialization(String),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Request/response operations against the remote workspace.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Register a new file. Fails with `Conflict` if the path already exists.
    async fn create_file(&self, file: &NewFile, content: &[u8]) -> Result<FileRecord>;

    /// Replace a file's content.
    async fn update_file(&self, id: FileId, content: &[u8]) -> Result<FileRecord>;

    /// Move a file to a new workspace path, keeping its id.
    async fn rename_file(&self, id: FileId, new_path: &str) -> Result<FileRecord>;

    /// Delete a file.
    async fn delete_file(&self, id: FileId) -> Result<()>;

    /// Download a file's content.
    async fn fetch_file(&self, id: FileId) -> Result<Vec<u8>>;

    /// List every file in the workspace.
    async fn list_files(&self, workspace_id: i64) -> Result<Vec<FileRecord>>;

    /// Look up the record currently stored at `path`.
    async fn find_by_path(&self, workspace_id: i64, path: &str) -> Result<Option<FileRecord>> {
        let path = normalize_path(path);
        Ok(self
            .list_files(workspace_id)
            .await?
            .into_iter()
            .find(|record| normalize_path(&record.workspace_path) == path))
    }
}

#[async_trait]
impl<T: RemoteStore + Send + Sync> RemoteStore for std::sync::Arc<T> {
    async fn create_file(&self, file: &NewFile, content: &[u8]) -> Result<FileRecord> {
        (**self).create_file(file, content).await
    }

    async fn update_file(&self, id: FileId, content: &[u8]) -> Result<FileRecord> {
        (**self).update_file(id, content).await
    }

    async fn rename_file(&self, id: FileId, new_path: &str) -> Result<FileRecord> {
        (**self).rename_file(id, new_path).await
    }

    async fn delete_file(&self, id: FileId) -> Result<()> {
        (**self).delete_file(id).await
    }

    async fn fetch_file(&self, id: FileId) -> Result<Vec<u8>> {
        (**self).fetch_file(id).await
    }

    async fn list_files(&self, workspace_id: i64) -> Result<Vec<FileRecord>> {
        (**self).list_files(workspace_id).await
    }
}

/// A call made against `InMemoryRemote`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Create(String),
    Update(FileId),
    Rename(FileId, String),
    Delete(FileId),
    Fetch(FileId),
    List,
}

struct StoredFile {
    record: FileRecord,
    content: Vec<u8>,
}

struct RemoteState {
    next_id: FileId,
    files: BTreeMap<FileId, StoredFile>,
    calls: Vec<RemoteCall>,
    offline: bool,
    unauthorized: bool,
}

/// In-memory workspace store for testing.
///
/// Several engines can share one instance (via `Arc`) to model multiple
/// participants of the same workspace.
pub struct InMemoryRemote {
    workspace_id: i64,
    state: Mutex<RemoteState>,
}

impl InMemoryRemote {
    pub fn new(workspace_id: i64) -> Self {
        Self {
            workspace_id,
            state: Mutex::new(RemoteState {
                next_id: 1,
                files: BTreeMap::new(),
                calls: Vec::new(),
                offline: false,
                unauthorized: false,
            }),
        }
    }

    pub fn workspace_id(&self) -> i64 {
        self.workspace_id
    }

    /// Store a file directly, as another participant would, without
    /// recording a call.
    pub fn seed(&self, path: &str, content: &[u8]) -> FileRecord {
        let mut state = self.lock();
        Self::insert(&mut state, self.workspace_id, path, content)
    }

    /// Replace content directly, without recording a call.
    pub fn overwrite(&self, id: FileId, content: &[u8]) -> Option<FileRecord> {
        let mut state = self.lock();
        let stored = state.files.get_mut(&id)?;
        stored.content = content.to_vec();
        stored.record.hash = ContentHash::from_bytes(content).as_str().to_string();
        stored.record.updated_at = Utc::now();
        Some(stored.record.clone())
    }

    /// Remove a file directly, without recording a call.
    pub fn remove(&self, id: FileId) -> Option<FileRecord> {
        self.lock().files.remove(&id).map(|stored| stored.record)
    }

    /// Simulate transport failure for every subsequent call.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Simulate rejected credentials for every subsequent call.
    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.lock().unauthorized = unauthorized;
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn create_calls(&self) -> usize {
        self.count(|call| matches!(call, RemoteCall::Create(_)))
    }

    pub fn update_calls(&self) -> usize {
        self.count(|call| matches!(call, RemoteCall::Update(_)))
    }

    pub fn delete_calls(&self) -> Vec<FileId> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::Delete(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Content and record stored at `path`.
    pub fn file_at(&self, path: &str) -> Option<(FileRecord, Vec<u8>)> {
        let path = normalize_path(path);
        self.lock()
            .files
            .values()
            .find(|stored| stored.record.workspace_path == path)
            .map(|stored| (stored.record.clone(), stored.content.clone()))
    }

    pub fn len(&self) -> usize {
        self.lock().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn count(&self, pred: impl Fn(&RemoteCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| pred(call)).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(state: &mut RemoteState, workspace_id: i64, path: &str, content: &[u8]) -> FileRecord {
        let id = state.next_id;
        state.next_id += 1;
        let now = Utc::now();
        let path = normalize_path(path);
        let record = FileRecord {
            id,
            workspace_path: path.clone(),
            disk_path: format!("objects/{}", id),
            hash: ContentHash::from_bytes(content).as_str().to_string(),
            created_at: now,
            updated_at: now,
            mime_type: crate::record::guess_mime_type(&path).to_string(),
            workspace_id,
        };
        state.files.insert(
            id,
            StoredFile {
                record: record.clone(),
                content: content.to_vec(),
            },
        );
        record
    }

    /// Record the call, then fail if a failure mode is switched on.
    fn begin(&self, call: RemoteCall) -> Result<std::sync::MutexGuard<'_, RemoteState>> {
        let mut state = self.lock();
        state.calls.push(call);
        if state.unauthorized {
            return Err(RemoteError::Unauthorized);
        }
        if state.offline {
            return Err(RemoteError::Unreachable("simulated outage".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn create_file(&self, file: &NewFile, content: &[u8]) -> Result<FileRecord> {
        let path = normalize_path(&file.workspace_path);
        let mut state = self.begin(RemoteCall::Create(path.clone()))?;
        if state.files.values().any(|s| s.record.workspace_path == path) {
            return Err(RemoteError::Conflict(path));
        }
        Ok(Self::insert(&mut state, file.workspace_id, &path, content))
    }

    async fn update_file(&self, id: FileId, content: &[u8]) -> Result<FileRecord> {
        let mut state = self.begin(RemoteCall::Update(id))?;
        let stored = state
            .files
            .get_mut(&id)
            .ok_or_else(|| RemoteError::NotFound(format!("file {}", id)))?;
        stored.content = content.to_vec();
        stored.record.hash = ContentHash::from_bytes(content).as_str().to_string();
        stored.record.updated_at = Utc::now();
        Ok(stored.record.clone())
    }

    async fn rename_file(&self, id: FileId, new_path: &str) -> Result<FileRecord> {
        let new_path = normalize_path(new_path);
        let mut state = self.begin(RemoteCall::Rename(id, new_path.clone()))?;
        if state
            .files
            .values()
            .any(|s| s.record.workspace_path == new_path && s.record.id != id)
        {
            return Err(RemoteError::Conflict(new_path));
        }
        let stored = state
            .files
            .get_mut(&id)
            .ok_or_else(|| RemoteError::NotFound(format!("file {}", id)))?;
        stored.record.workspace_path = new_path;
        stored.record.updated_at = Utc::now();
        Ok(stored.record.clone())
    }

    async fn delete_file(&self, id: FileId) -> Result<()> {
        let mut state = self.begin(RemoteCall::Delete(id))?;
        state
            .files
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(format!("file {}", id)))
    }

    async fn fetch_file(&self, id: FileId) -> Result<Vec<u8>> {
        let state = self.begin(RemoteCall::Fetch(id))?;
        state
            .files
            .get(&id)
            .map(|stored| stored.content.clone())
            .ok_or_else(|| RemoteError::NotFound(format!("file {}", id)))
    }

    async fn list_files(&self, workspace_id: i64) -> Result<Vec<FileRecord>> {
        let state = self.begin(RemoteCall::List)?;
        Ok(state
            .files
            .values()
            .filter(|stored| stored.record.workspace_id == workspace_id)
            .map(|stored| stored.record.clone())
            .collect())
    }
}
