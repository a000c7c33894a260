//! Remote file records and content hashing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Remote-assigned file identifier, immutable once created.
pub type FileId = i64;

/// A file as the remote workspace store knows it.
///
/// Every field is required: a payload missing one fails to deserialize
/// instead of yielding a partial record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    /// Vault-relative, slash separated, unique within the workspace
    pub workspace_path: String,
    /// Server-side storage location (opaque)
    pub disk_path: String,
    /// Content digest
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub mime_type: String,
    pub workspace_id: i64,
}

/// Metadata sent along with the content when registering a new file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFile {
    pub workspace_id: i64,
    pub workspace_path: String,
    pub mime_type: String,
}

impl NewFile {
    pub fn new(workspace_id: i64, workspace_path: &str) -> Self {
        Self {
            workspace_id,
            workspace_path: workspace_path.to_string(),
            mime_type: guess_mime_type(workspace_path).to_string(),
        }
    }
}

/// Hex SHA-256 of file content, comparable with `FileRecord::hash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn from_bytes(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a remote digest string.
    pub fn matches(&self, remote: &str) -> bool {
        self.0.eq_ignore_ascii_case(remote)
    }
}

impl From<&str> for ContentHash {
    fn from(remote: &str) -> Self {
        Self(remote.to_ascii_lowercase())
    }
}

/// Best-effort MIME type from the file extension.
pub fn guess_mime_type(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "md" | "markdown" => "text/markdown",
        "txt" => "text/plain",
        "json" => "application/json",
        "canvas" => "application/json",
        "css" => "text/css",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
