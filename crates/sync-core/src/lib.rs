//! sync-core: Shared Rust library for keeping a local vault and a remote
//! workspace in sync.
//!
//! This crate provides the core functionality for:
//! - Tracking which vault path corresponds to which remote file id
//! - Turning local filesystem events into remote operations
//! - Applying remote change notifications to the vault
//! - Reconciling both sides after startup or a reconnect
//! - FileSystem, RemoteStore and PushChannel trait abstractions

pub mod change;
pub mod config;
pub mod engine;
pub mod events;
pub mod fs;
pub mod identity;
pub mod push;
pub mod record;
pub mod remote;
pub mod tracker;

pub use change::{EngineInput, LocalEvent, LocalFile, RemoteNotification};
pub use config::{ConfigError, SyncConfig};
pub use engine::{EngineError, EngineStatus, ReconcileReport, SyncEngine};
pub use events::{EventBus, Subscription, SyncEvent};
pub use fs::{FileSystem, FsError, InMemoryFs};
pub use identity::IdentityMap;
pub use push::{HubChannel, InMemoryHub, PushChannel, PushError, PushEvent};
pub use record::{ContentHash, FileId, FileRecord, NewFile};
pub use remote::{InMemoryRemote, RemoteCall, RemoteError, RemoteStore};
pub use tracker::RecentlyApplied;
