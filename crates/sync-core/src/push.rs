//! PushChannel trait for the long-lived notification channel.
//!
//! Implementations:
//! - `HubChannel` - In-memory participant of an `InMemoryHub`, for testing
//! - `WsPushChannel` (in sync-daemon) - WebSocket with automatic reconnect
//!
//! Reconnection is the implementation's job. The engine only sees a
//! `PushEvent::Reconnected` and answers it with a reconciliation pass.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::change::{EngineInput, RemoteNotification};

#[derive(Debug, Error)]
pub enum PushError {
    #[error("Not connected")]
    NotConnected,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PushError>;

/// Item produced by a push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Notification(RemoteNotification),
    /// The connection dropped and came back; notifications may be missing
    Reconnected,
}

impl From<PushEvent> for EngineInput {
    fn from(event: PushEvent) -> Self {
        match event {
            PushEvent::Notification(notification) => EngineInput::Remote(notification),
            PushEvent::Reconnected => EngineInput::Reconnected,
        }
    }
}

/// Duplex channel to the remote coordinator.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Identifier stamped on our own broadcasts as `origin`
    fn participant_id(&self) -> &str;

    /// Next event, in the order the server sent it. `None` once closed.
    async fn recv(&self) -> Option<PushEvent>;

    /// Tell other participants about a local change. Best-effort.
    async fn broadcast(&self, notification: &RemoteNotification) -> Result<()>;

    /// Close the channel cleanly.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<T: PushChannel + Send + Sync> PushChannel for Arc<T> {
    fn participant_id(&self) -> &str {
        (**self).participant_id()
    }

    async fn recv(&self) -> Option<PushEvent> {
        (**self).recv().await
    }

    async fn broadcast(&self, notification: &RemoteNotification) -> Result<()> {
        (**self).broadcast(notification).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

struct Member {
    tx: mpsc::UnboundedSender<PushEvent>,
    connected: bool,
}

#[derive(Default)]
struct HubState {
    members: HashMap<String, Member>,
    broadcasts: Vec<RemoteNotification>,
}

/// In-memory coordinator relaying broadcasts between participants.
///
/// Like a real server, a broadcast is delivered to every connected member,
/// the sender included.
#[derive(Clone, Default)]
pub struct InMemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl InMemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the hub as `participant_id`.
    pub fn join(&self, participant_id: &str) -> HubChannel {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().members.insert(
            participant_id.to_string(),
            Member {
                tx,
                connected: true,
            },
        );
        HubChannel {
            participant_id: participant_id.to_string(),
            hub: self.clone(),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Deliver a server-originated notification to every connected member.
    pub fn publish(&self, notification: RemoteNotification) {
        let state = self.lock();
        for member in state.members.values().filter(|m| m.connected) {
            let _ = member.tx.send(PushEvent::Notification(notification.clone()));
        }
    }

    /// Stop delivering to `participant_id`; anything published meanwhile is lost.
    pub fn disconnect(&self, participant_id: &str) {
        if let Some(member) = self.lock().members.get_mut(participant_id) {
            member.connected = false;
        }
    }

    /// Resume delivery and signal `Reconnected`.
    pub fn reconnect(&self, participant_id: &str) {
        if let Some(member) = self.lock().members.get_mut(participant_id) {
            member.connected = true;
            let _ = member.tx.send(PushEvent::Reconnected);
        }
    }

    /// Every broadcast received so far.
    pub fn broadcasts(&self) -> Vec<RemoteNotification> {
        self.lock().broadcasts.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One participant's end of an `InMemoryHub`.
pub struct HubChannel {
    participant_id: String,
    hub: InMemoryHub,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PushEvent>>,
}

impl HubChannel {
    /// Next already-queued event without waiting.
    pub fn try_recv(&self) -> Option<PushEvent> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

#[async_trait]
impl PushChannel for HubChannel {
    fn participant_id(&self) -> &str {
        &self.participant_id
    }

    async fn recv(&self) -> Option<PushEvent> {
        self.rx.lock().await.recv().await
    }

    async fn broadcast(&self, notification: &RemoteNotification) -> Result<()> {
        let mut state = self.hub.lock();
        let sender_connected = state
            .members
            .get(&self.participant_id)
            .map(|m| m.connected)
            .unwrap_or(false);
        if !sender_connected {
            return Err(PushError::NotConnected);
        }
        state.broadcasts.push(notification.clone());
        for member in state.members.values().filter(|m| m.connected) {
            let _ = member.tx.send(PushEvent::Notification(notification.clone()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.hub.lock().members.remove(&self.participant_id);
        self.rx.lock().await.close();
        Ok(())
    }
}
