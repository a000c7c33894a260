//! sync-daemon: Headless vault sync daemon.
//!
//! Uses the same sync-core engine as the editor plugin, but runs as a native
//! binary with a native filesystem, an HTTP remote store and a WebSocket
//! push channel.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sync_daemon::http::HttpRemoteStore;
use sync_daemon::native_fs::NativeFs;
use sync_daemon::pump::{drain_queued, feed};
use sync_daemon::watcher::FileWatcher;
use sync_daemon::ws::WsPushChannel;

use sync_core::push::PushChannel;
use sync_core::{EngineError, EngineInput, EngineStatus, RemoteError, SyncConfig, SyncEngine, SyncEvent};

/// How often to retry reconciliation while the remote is unreachable.
const PAUSED_RETRY_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "sync-daemon")]
#[command(about = "Keeps a vault directory in sync with a remote workspace")]
struct Args {
    /// Path to the vault directory
    #[arg(short, long)]
    vault: String,

    /// JSON settings file (domain, https, workspaceName, workspacePass)
    #[arg(short, long)]
    config: Option<String>,

    /// Server host:port (overrides the settings file)
    #[arg(long)]
    domain: Option<String>,

    /// Use https/wss
    #[arg(long)]
    https: bool,

    /// Workspace name (overrides the settings file)
    #[arg(short, long)]
    workspace: Option<String>,

    /// Workspace password (overrides the settings file)
    #[arg(long, env = "SYNC_WORKSPACE_PASS", hide_env_values = true)]
    password: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    /// Settings file values with command line overrides applied.
    fn sync_config(&self) -> Result<SyncConfig> {
        let mut config = match &self.config {
            Some(path) => SyncConfig::load(&expand_tilde(path))?,
            None => SyncConfig::default(),
        };
        if let Some(domain) = &self.domain {
            config.domain = domain.clone();
        }
        if self.https {
            config.https = true;
        }
        if let Some(workspace) = &self.workspace {
            config.workspace_name = workspace.clone();
        }
        if let Some(password) = &self.password {
            config.workspace_pass = password.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

/// Expand ~ or ~/ prefix to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

/// Log engine notices for whoever is watching the daemon.
fn log_notice(event: SyncEvent) {
    match event {
        SyncEvent::ConflictResolved { path, .. } => {
            warn!("{} already existed remotely; kept the remote copy", path)
        }
        SyncEvent::Paused { reason } => warn!("Server unreachable, sync paused: {}", reason),
        SyncEvent::Resumed => info!("Server reachable again, sync resumed"),
        SyncEvent::Halted { reason } => error!("Sync stopped: {}", reason),
        SyncEvent::Reconciled {
            downloaded,
            uploaded,
            overwritten,
            dropped,
        } => info!(
            "Vault reconciled ({} downloaded, {} uploaded, {} overwritten, {} removed)",
            downloaded, uploaded, overwritten, dropped
        ),
        _ => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,sync_daemon=debug,sync_core=debug"
    } else {
        "info,sync_daemon=info,sync_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.sync_config()?;
    let vault_path = expand_tilde(&args.vault);

    info!("Starting sync-daemon");
    info!("Vault path: {:?}", vault_path);
    info!("Server: {:?}", config);

    let remote = HttpRemoteStore::new(&config).context("Failed to build HTTP client")?;
    let workspace = remote
        .resolve_workspace(&config.workspace_name)
        .await
        .with_context(|| format!("Failed to resolve workspace {}", config.workspace_name))?;
    info!("Workspace {} has id {}", workspace.name, workspace.id);

    let participant_id = uuid::Uuid::new_v4().to_string();
    info!("Participant ID: {}", participant_id);

    let push = Arc::new(WsPushChannel::connect(&config, workspace.id, participant_id).await?);
    let fs = NativeFs::new(vault_path.clone());
    let mut engine = SyncEngine::new(fs, remote, Arc::clone(&push), workspace.id);
    let _notices = engine.events().subscribe(log_notice);

    match engine.start().await {
        Ok(_) => {}
        Err(EngineError::Remote(RemoteError::Unauthorized)) => {
            bail!("Workspace credentials were rejected")
        }
        Err(e) => warn!("Startup reconciliation incomplete, will retry: {}", e),
    }

    let mut watcher = FileWatcher::new(vault_path)?;
    info!("File watcher started");

    let mut paused_retry = tokio::time::interval(PAUSED_RETRY_INTERVAL);
    paused_retry.tick().await;

    info!("Daemon running. Press Ctrl+C to stop.");

    // Main event loop
    loop {
        let input: EngineInput = tokio::select! {
            // Handle file watcher events
            Some(event) = watcher.event_rx().recv() => event.into(),

            // Handle push channel events (notifications, reconnects)
            event = push.recv() => match event {
                Some(event) => event.into(),
                None => {
                    warn!("Push channel closed");
                    break;
                }
            },

            // Retry while the server is unreachable
            _ = paused_retry.tick(), if engine.is_paused() => EngineInput::Reconnected,

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        };

        if !feed(&mut engine, input).await {
            break;
        }
    }

    info!("Shutting down");
    let mut halted = engine.status() == EngineStatus::Halted;
    if !halted {
        drain_queued(watcher.event_rx(), &mut engine).await;
        halted = engine.status() == EngineStatus::Halted;
    }
    engine.shutdown().await;
    if halted {
        bail!("Sync halted: workspace credentials were rejected");
    }
    Ok(())
}
