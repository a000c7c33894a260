//! Feeding daemon inputs into the engine.
//!
//! The main loop selects over the watcher, the push channel and the paused
//! retry timer; these helpers decide whether it keeps going.

use sync_core::fs::FileSystem;
use sync_core::push::PushChannel;
use sync_core::remote::RemoteStore;
use sync_core::{EngineInput, EngineStatus, LocalEvent, SyncEngine};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Hand one input to the engine.
///
/// Returns `false` once the engine will not take more input, either because
/// it refused this one or because handling it halted sync.
pub async fn feed<F, R, P>(engine: &mut SyncEngine<F, R, P>, input: EngineInput) -> bool
where
    F: FileSystem,
    R: RemoteStore,
    P: PushChannel,
{
    if let Err(e) = engine.handle(input).await {
        error!("Engine stopped accepting input: {}", e);
        return false;
    }
    if engine.status() == EngineStatus::Halted {
        error!("Sync halted, leaving the event loop");
        return false;
    }
    true
}

/// Process watcher events that are already queued, without waiting for more.
///
/// Called before shutdown so edits made just before Ctrl+C still reach the
/// remote. Returns how many events were handled.
pub async fn drain_queued<F, R, P>(
    rx: &mut mpsc::UnboundedReceiver<LocalEvent>,
    engine: &mut SyncEngine<F, R, P>,
) -> usize
where
    F: FileSystem,
    R: RemoteStore,
    P: PushChannel,
{
    let mut handled = 0;
    while let Ok(event) = rx.try_recv() {
        if !feed(engine, event.into()).await {
            break;
        }
        handled += 1;
    }
    if handled > 0 {
        debug!("Flushed {} queued local event(s)", handled);
    }
    handled
}
