//! Connection settings for a workspace.
//!
//! Stored as camelCase JSON, the same shape the host plugin keeps in its
//! settings file. The engine never re-validates these; `validate` exists
//! for the binaries that load them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_DOMAIN: &str = "127.0.0.1:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Server domain is empty")]
    MissingDomain,

    #[error("Workspace name is empty")]
    MissingWorkspace,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Server `host:port`
    pub domain: String,
    /// Use https/wss instead of http/ws
    pub https: bool,
    /// Remote workspace to sync with
    pub workspace_name: String,
    /// Remote workspace password
    pub workspace_pass: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            https: false,
            workspace_name: String::new(),
            workspace_pass: String::new(),
        }
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("domain", &self.domain)
            .field("https", &self.https)
            .field("workspace_name", &self.workspace_name)
            .field("workspace_pass", &mask(&self.workspace_pass))
            .finish()
    }
}

impl SyncConfig {
    /// Load settings from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(ConfigError::MissingDomain);
        }
        if self.workspace_name.trim().is_empty() {
            return Err(ConfigError::MissingWorkspace);
        }
        Ok(())
    }

    /// Base URL for request/response calls, with trailing slash.
    pub fn http_base_url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        format!("{}://{}/", scheme, self.domain.trim_end_matches('/'))
    }

    /// Push channel URL for a workspace.
    pub fn ws_url(&self, workspace_id: i64) -> String {
        let scheme = if self.https { "wss" } else { "ws" };
        format!(
            "{}://{}/api/v1/workspaces/{}/ws",
            scheme,
            self.domain.trim_end_matches('/'),
            workspace_id
        )
    }
}

/// Replace every character with `*`, keeping the length.
pub fn mask(secret: &str) -> String {
    "*".repeat(secret.chars().count())
}
