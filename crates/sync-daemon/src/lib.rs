//! sync-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod backoff;
pub mod http;
pub mod native_fs;
pub mod pump;
pub mod watcher;
pub mod ws;

// Re-export key types for convenience
pub use backoff::{calculate_backoff, ReconnectConfig, RetryConfig};
pub use http::{HttpRemoteStore, Workspace};
pub use native_fs::NativeFs;
pub use pump::{drain_queued, feed};
pub use watcher::FileWatcher;
pub use ws::{WsPushChannel, MAX_MESSAGE_SIZE};
