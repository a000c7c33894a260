//! WebSocket push channel.
//!
//! Holds one connection to the workspace's notification endpoint:
//! - Basic auth on the upgrade request
//! - A read task that decodes `RemoteNotification` frames into a queue
//! - Automatic reconnection with exponential backoff, announced to the
//!   engine as `PushEvent::Reconnected`

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use sync_core::change::RemoteNotification;
use sync_core::push::{self, PushChannel, PushError, PushEvent};
use sync_core::SyncConfig;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::backoff::{ReconnectConfig, ReconnectState};

/// Maximum accepted frame size (50MB).
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type SharedSink = Arc<Mutex<Option<WsSink>>>;

/// Where and as whom to connect; kept for reconnects.
#[derive(Clone)]
struct Endpoint {
    url: String,
    authorization: String,
}

impl Endpoint {
    fn new(url: String, username: &str, password: &str) -> Self {
        let token = STANDARD.encode(format!("{}:{}", username, password));
        Self {
            url,
            authorization: format!("Basic {}", token),
        }
    }

    fn request(&self) -> Result<Request> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .with_context(|| format!("Invalid push channel URL {}", self.url))?;
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&self.authorization).context("Invalid credentials")?,
        );
        Ok(request)
    }

    async fn open(&self) -> Result<WsStream> {
        let (ws, _) = connect_async(self.request()?)
            .await
            .with_context(|| format!("Failed to connect to {}", self.url))?;
        Ok(ws)
    }
}

/// `PushChannel` over a reconnecting WebSocket.
pub struct WsPushChannel {
    participant_id: String,
    /// Write half of the current connection, `None` while reconnecting
    write: SharedSink,
    events: Mutex<mpsc::UnboundedReceiver<PushEvent>>,
    /// Read and reconnect task
    task: JoinHandle<()>,
}

impl WsPushChannel {
    /// Connect to the notification endpoint of `workspace_id`.
    ///
    /// The first connection must succeed; later drops are retried forever.
    pub async fn connect(
        config: &SyncConfig,
        workspace_id: i64,
        participant_id: impl Into<String>,
    ) -> Result<Self> {
        Self::connect_url(
            config.ws_url(workspace_id),
            &config.workspace_name,
            &config.workspace_pass,
            participant_id,
            ReconnectConfig::default(),
        )
        .await
    }

    /// Connect to an explicit URL (useful for testing).
    pub async fn connect_url(
        url: String,
        username: &str,
        password: &str,
        participant_id: impl Into<String>,
        reconnect: ReconnectConfig,
    ) -> Result<Self> {
        let endpoint = Endpoint::new(url, username, password);
        let ws = endpoint.open().await?;
        info!("Push channel connected to {}", endpoint.url);

        let (write, read) = ws.split();
        let write: SharedSink = Arc::new(Mutex::new(Some(write)));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let task_write = Arc::clone(&write);
        let task = tokio::spawn(async move {
            Self::run(endpoint, read, task_write, event_tx, reconnect).await;
        });

        Ok(Self {
            participant_id: participant_id.into(),
            write,
            events: Mutex::new(event_rx),
            task,
        })
    }

    /// Read until the connection drops, then reconnect and repeat.
    async fn run(
        endpoint: Endpoint,
        mut read: SplitStream<WsStream>,
        write: SharedSink,
        event_tx: mpsc::UnboundedSender<PushEvent>,
        config: ReconnectConfig,
    ) {
        let mut state = ReconnectState::new();

        loop {
            Self::read_loop(&endpoint.url, &mut read, &event_tx).await;
            *write.lock().await = None;
            if event_tx.is_closed() {
                return;
            }

            loop {
                if state.exceeded_max_attempts(&config) {
                    error!(
                        "Giving up on {} after {} reconnect attempts",
                        endpoint.url, state.attempts
                    );
                    return;
                }
                let delay = state.next_delay(&config);
                info!(
                    "Push channel lost, reconnecting in {:?} (attempt {})",
                    delay, state.attempts
                );
                tokio::time::sleep(delay).await;

                match endpoint.open().await {
                    Ok(ws) => {
                        let (new_write, new_read) = ws.split();
                        *write.lock().await = Some(new_write);
                        read = new_read;
                        state.reset();
                        info!("Push channel reconnected to {}", endpoint.url);
                        if event_tx.send(PushEvent::Reconnected).is_err() {
                            return;
                        }
                        break;
                    }
                    Err(e) => warn!("Reconnect failed: {:#}", e),
                }
            }
        }
    }

    /// Forward decoded notifications until the connection ends.
    async fn read_loop(
        address: &str,
        read: &mut SplitStream<WsStream>,
        event_tx: &mpsc::UnboundedSender<PushEvent>,
    ) {
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let data = match msg {
                        Message::Binary(data) => data.to_vec(),
                        Message::Text(text) => text.as_bytes().to_vec(),
                        Message::Ping(_) | Message::Pong(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from {}", address);
                            break;
                        }
                        Message::Frame(_) => continue,
                    };

                    if data.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            "Message from {} exceeds max size ({} > {}), dropping",
                            address,
                            data.len(),
                            MAX_MESSAGE_SIZE
                        );
                        continue;
                    }

                    match RemoteNotification::from_json(&data) {
                        Ok(notification) => {
                            if event_tx.send(PushEvent::Notification(notification)).is_err() {
                                // Receiver dropped
                                return;
                            }
                        }
                        Err(e) => warn!("Skipping unparseable frame from {}: {}", address, e),
                    }
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection {} closed", address);
                        }
                        _ => {
                            error!("WebSocket error on {}: {}", address, e);
                        }
                    }
                    break;
                }
                None => {
                    debug!("Connection {} stream ended", address);
                    break;
                }
            }
        }
    }

    /// True while a connection is up.
    pub async fn is_connected(&self) -> bool {
        self.write.lock().await.is_some()
    }
}

#[async_trait]
impl PushChannel for WsPushChannel {
    fn participant_id(&self) -> &str {
        &self.participant_id
    }

    async fn recv(&self) -> Option<PushEvent> {
        self.events.lock().await.recv().await
    }

    async fn broadcast(&self, notification: &RemoteNotification) -> push::Result<()> {
        let json = notification.to_json()?;
        let mut write = self.write.lock().await;
        let sink = write.as_mut().ok_or(PushError::NotConnected)?;
        sink.send(Message::text(json))
            .await
            .map_err(|e| PushError::SendFailed(e.to_string()))
    }

    async fn close(&self) -> push::Result<()> {
        self.task.abort();
        if let Some(mut sink) = self.write.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
        }
        self.events.lock().await.close();
        Ok(())
    }
}

impl Drop for WsPushChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}
