//! Websocket session client.
//!
//! Lifecycle:
//! - connect to `<hub_url>/<session_id>` and send `sync-request`
//! - the hub always answers `sync-response`; the caller must load the
//!   returned document state before anything else
//! - afterwards, `change` and `presence` messages flow both ways
//!
//! The client stays in `Connecting` until the `sync-response` arrives; there
//! is no handshake timeout (a silent hub is a deliberate soft-failure
//! mode). Lost connections reconnect with exponential backoff, 1 s doubling
//! to a 30 s cap, and a reconnect re-issues `sync-request` like any other
//! join. Edits made while disconnected stay in the local replica and ride
//! along after the next handshake.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::{PresencePayload, WireMessage};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the session client.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The sync handshake completed.
    Connected,
    /// The connection dropped; a reconnect is scheduled.
    Disconnected,
    /// The hub's authoritative document state. Load this first.
    StateSynced {
        session_id: String,
        document_state: Vec<u8>,
        is_first_user: bool,
    },
    /// A peer's change blob.
    RemoteChange { sender_id: String, changes: Vec<u8> },
    /// A peer's presence update.
    RemotePresence {
        sender_id: String,
        presence: PresencePayload,
    },
}

/// Session client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hub websocket URL.
    pub hub_url: String,
    /// Session token. Any connector with the token may join.
    pub session_id: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hub_url: "ws://localhost:8080".to_string(),
            session_id: "default".to_string(),
        }
    }
}

/// The session client. Spawns background tasks on [`SessionClient::start`];
/// the application consumes [`SessionEvent`]s from the receiver taken via
/// [`SessionClient::take_event_rx`].
pub struct SessionClient {
    sender_id: String,
    config: ClientConfig,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: mpsc::Sender<WireMessage>,
    outgoing_rx: Option<mpsc::Receiver<WireMessage>>,
    event_tx: mpsc::Sender<SessionEvent>,
    event_rx: Option<mpsc::Receiver<SessionEvent>>,
}

impl SessionClient {
    pub fn new(config: ClientConfig) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(256);
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            sender_id: Uuid::new_v4().to_string(),
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx,
            outgoing_rx: Some(outgoing_rx),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Create with an explicit sender id (the replica's user id, so the hub
    /// and peers can correlate changes with presence).
    pub fn with_sender_id(sender_id: impl Into<String>, config: ClientConfig) -> Self {
        let mut client = Self::new(config);
        client.sender_id = sender_id.into();
        client
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn hub_url(&self) -> &str {
        &self.config.hub_url
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.take()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Queue a change blob for broadcast. Queued messages flush after the
    /// next successful handshake when currently disconnected.
    pub async fn send_change(&self, changes: Vec<u8>) {
        let msg = WireMessage::change(self.sender_id.clone(), changes);
        if self.outgoing_tx.send(msg).await.is_err() {
            log::warn!("session client task gone; dropping change");
        }
    }

    /// Queue a presence update.
    pub async fn send_presence(&self, presence: PresencePayload) {
        let msg = WireMessage::presence(self.sender_id.clone(), presence);
        if self.outgoing_tx.send(msg).await.is_err() {
            log::warn!("session client task gone; dropping presence");
        }
    }

    /// Spawn the connection supervisor. It owns the socket for the client's
    /// lifetime, reconnecting with backoff until the client is dropped.
    pub fn start(&mut self) {
        let Some(outgoing_rx) = self.outgoing_rx.take() else {
            log::warn!("session client already started");
            return;
        };
        let supervisor = Supervisor {
            sender_id: self.sender_id.clone(),
            url: format!(
                "{}/{}",
                self.config.hub_url.trim_end_matches('/'),
                self.config.session_id
            ),
            state: self.state.clone(),
            event_tx: self.event_tx.clone(),
        };
        tokio::spawn(supervisor.run(outgoing_rx));
    }
}

struct Supervisor {
    sender_id: String,
    url: String,
    state: Arc<RwLock<ConnectionState>>,
    event_tx: mpsc::Sender<SessionEvent>,
}

/// How one connection attempt ended.
enum Drive {
    /// Handshake completed, then the link dropped.
    Synced,
    /// The link dropped before the handshake completed.
    NotSynced,
    /// The client handle was dropped; the supervisor should exit.
    ClientGone,
}

impl Supervisor {
    async fn run(self, mut outgoing_rx: mpsc::Receiver<WireMessage>) {
        let mut backoff = INITIAL_BACKOFF;
        let mut had_session = false;

        loop {
            *self.state.write().await = if had_session {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            };

            match tokio_tungstenite::connect_async(&self.url).await {
                Ok((stream, _)) => {
                    log::info!("connected to hub at {}", self.url);
                    let outcome = self.drive_connection(stream, &mut outgoing_rx).await;
                    *self.state.write().await = ConnectionState::Disconnected;
                    match outcome {
                        Drive::Synced => {
                            had_session = true;
                            backoff = INITIAL_BACKOFF;
                            let _ = self.event_tx.send(SessionEvent::Disconnected).await;
                        }
                        Drive::NotSynced => {}
                        Drive::ClientGone => return,
                    }
                }
                Err(e) => {
                    log::warn!("hub connect failed: {e}");
                    *self.state.write().await = ConnectionState::Disconnected;
                }
            }
            if self.event_tx.is_closed() {
                return; // nobody is listening anymore
            }

            log::info!("reconnecting in {:?}", backoff);
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Run one connection to completion.
    async fn drive_connection(
        &self,
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        outgoing_rx: &mut mpsc::Receiver<WireMessage>,
    ) -> Drive {
        let (mut ws_sender, mut ws_receiver) = stream.split();

        let request = WireMessage::sync_request(self.sender_id.clone());
        let encoded = match request.encode() {
            Ok(text) => text,
            Err(e) => {
                log::error!("failed to encode sync-request: {e}");
                return Drive::NotSynced;
            }
        };
        if ws_sender.send(Message::Text(encoded.into())).await.is_err() {
            return Drive::NotSynced;
        }

        let mut synced = false;
        loop {
            tokio::select! {
                outgoing = outgoing_rx.recv() => {
                    match outgoing {
                        Some(msg) => {
                            let Ok(text) = msg.encode() else { continue };
                            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => return Drive::ClientGone,
                    }
                }
                incoming = ws_receiver.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if !self.handle_frame(text.as_str(), &mut synced).await {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            log::warn!("websocket error: {e}");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }
        if synced {
            Drive::Synced
        } else {
            Drive::NotSynced
        }
    }

    /// Dispatch one text frame. Returns false to drop the connection.
    async fn handle_frame(&self, text: &str, synced: &mut bool) -> bool {
        let msg = match WireMessage::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                // Parse failures discard the single message only.
                log::warn!("discarding unparseable message: {e}");
                return true;
            }
        };

        match msg {
            WireMessage::SyncResponse {
                session_id,
                document_state,
                is_first_user,
            } => {
                *self.state.write().await = ConnectionState::Connected;
                *synced = true;
                let _ = self.event_tx.send(SessionEvent::Connected).await;
                let _ = self
                    .event_tx
                    .send(SessionEvent::StateSynced {
                        session_id,
                        document_state,
                        is_first_user,
                    })
                    .await;
            }
            WireMessage::Change { sender_id, changes } => {
                // Never apply our own echoes.
                if sender_id != self.sender_id {
                    let _ = self
                        .event_tx
                        .send(SessionEvent::RemoteChange { sender_id, changes })
                        .await;
                }
            }
            WireMessage::Presence {
                sender_id,
                presence,
            } => {
                if sender_id != self.sender_id {
                    let _ = self
                        .event_tx
                        .send(SessionEvent::RemotePresence {
                            sender_id,
                            presence,
                        })
                        .await;
                }
            }
            WireMessage::SyncRequest { .. } => {
                log::debug!("ignoring client-bound sync-request");
            }
        }
        true
    }
}
