//! The session hub: authoritative replica and relay, one per session id.
//!
//! ```text
//! Client A ──┐
//!            ├── Session ("default") ── authoritative Doc
//! Client B ──┘            │
//!                         └── broadcast channel (fan-out to N-1 peers)
//! ```
//!
//! The hub never originates commands. For every session it keeps one
//! authoritative document so later joiners receive the full state in their
//! `sync-response`; incoming `change` blobs are merged into it and the raw
//! frame is fanned out to every other client. `presence` frames are fanned
//! out without interpretation.
//!
//! Sessions are reaped in two ways: a 60 s grace timer once the last client
//! leaves, and a periodic sweep that removes sessions idle for over an
//! hour with zero clients.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use crate::protocol::WireMessage;
use crate::shared_history;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address to bind to.
    pub bind_addr: String,
    /// Broadcast channel capacity per session.
    pub broadcast_capacity: usize,
    /// How long an empty session lingers before deletion.
    pub empty_session_grace: Duration,
    /// How often the inactive-session sweep runs.
    pub sweep_interval: Duration,
    /// Idle age at which a zero-client session is swept.
    pub session_idle_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            broadcast_capacity: 256,
            empty_session_grace: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(600),
            session_idle_timeout: Duration::from_secs(3600),
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub active_sessions: usize,
}

/// One session: authoritative document plus fan-out.
struct Session {
    doc: Doc,
    /// Raw frames tagged with their origin, so receivers skip the sender.
    broadcast: broadcast::Sender<(String, Arc<String>)>,
    clients: HashSet<String>,
    last_active: Instant,
    empty_since: Option<Instant>,
}

impl Session {
    fn new(broadcast_capacity: usize) -> Self {
        let doc = Doc::new();
        let _curves = doc.get_or_insert_array("curves");
        let _users = doc.get_or_insert_map("users");
        let history = doc.get_or_insert_map("history");
        {
            // Seed the shared history lineage so every joiner, including the
            // first, loads the same root.
            let mut txn = doc.transact_mut();
            shared_history::seed(&mut txn, &history);
        }
        let (broadcast, _) = broadcast::channel(broadcast_capacity);
        Self {
            doc,
            broadcast,
            clients: HashSet::new(),
            last_active: Instant::now(),
            empty_since: None,
        }
    }

    fn save(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    fn apply(&mut self, blob: &[u8]) -> Result<(), String> {
        let update = Update::decode_v1(blob).map_err(|e| e.to_string())?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update).map_err(|e| e.to_string())
    }
}

type Sessions = Arc<RwLock<HashMap<String, Session>>>;

/// The session hub.
pub struct SessionHub {
    config: HubConfig,
    sessions: Sessions,
    stats: Arc<RwLock<HubStats>>,
}

impl SessionHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(HubStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(HubConfig::default())
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub async fn stats(&self) -> HubStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_sessions = self.sessions.read().await.len();
        stats
    }

    /// Listen for websocket connections. Runs the hub event loop.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_sweeper();

        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("session hub listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new connection from {addr}");

            let sessions = self.sessions.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, sessions, stats, config).await
                {
                    log::warn!("connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Periodically drop zero-client sessions that have been idle too long.
    fn spawn_sweeper(&self) {
        let sessions = self.sessions.clone();
        let interval = self.config.sweep_interval;
        let idle_timeout = self.config.session_idle_timeout;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the immediate first tick
            loop {
                ticker.tick().await;
                let mut sessions = sessions.write().await;
                sessions.retain(|id, session| {
                    let stale =
                        session.clients.is_empty() && session.last_active.elapsed() > idle_timeout;
                    if stale {
                        log::info!("sweeping inactive session {id}");
                    }
                    !stale
                });
            }
        });
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        sessions: Sessions,
        stats: Arc<RwLock<HubStats>>,
        config: HubConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // The session token is the URL path; a bare connect joins "default".
        let mut path = String::new();
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp| {
            path = req.uri().path().to_string();
            Ok::<Response, tokio_tungstenite::tungstenite::handshake::server::ErrorResponse>(resp)
        })
        .await?;
        let session_id = {
            let trimmed = path.trim_matches('/');
            if trimmed.is_empty() {
                "default".to_string()
            } else {
                trimmed.to_string()
            }
        };

        log::info!("websocket established from {addr} for session {session_id:?}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let mut sender_id: Option<String> = None;
        let mut broadcast_rx: Option<broadcast::Receiver<(String, Arc<String>)>> = None;

        loop {
            tokio::select! {
                incoming = ws_receiver.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                            }
                            let raw = text.as_str().to_string();
                            let msg = match WireMessage::decode(&raw) {
                                Ok(msg) => msg,
                                Err(e) => {
                                    // Discard the single message; the
                                    // connection stays open.
                                    log::warn!("unparseable message from {addr}: {e}");
                                    continue;
                                }
                            };

                            match msg {
                                WireMessage::SyncRequest { sender_id: sid } => {
                                    let (response, rx) = {
                                        let mut sessions = sessions.write().await;
                                        let created = !sessions.contains_key(&session_id);
                                        let session = sessions
                                            .entry(session_id.clone())
                                            .or_insert_with(|| Session::new(config.broadcast_capacity));
                                        if created {
                                            log::info!("created session {session_id:?}");
                                        }
                                        session.clients.insert(sid.clone());
                                        session.last_active = Instant::now();
                                        session.empty_since = None;
                                        (
                                            WireMessage::sync_response(
                                                session_id.clone(),
                                                session.save(),
                                                created,
                                            ),
                                            session.broadcast.subscribe(),
                                        )
                                    };
                                    sender_id = Some(sid);
                                    broadcast_rx = Some(rx);
                                    let encoded = response.encode()?;
                                    ws_sender.send(Message::Text(encoded.into())).await?;
                                }

                                WireMessage::Change { sender_id: sid, changes } => {
                                    let outlet = {
                                        let mut sessions = sessions.write().await;
                                        match sessions.get_mut(&session_id) {
                                            Some(session) => match session.apply(&changes) {
                                                Ok(()) => {
                                                    session.last_active = Instant::now();
                                                    Some(session.broadcast.clone())
                                                }
                                                Err(e) => {
                                                    log::warn!(
                                                        "discarding malformed change from {sid}: {e}"
                                                    );
                                                    None
                                                }
                                            },
                                            None => {
                                                log::warn!("change for unknown session {session_id:?}");
                                                None
                                            }
                                        }
                                    };
                                    if let Some(outlet) = outlet {
                                        let _ = outlet.send((sid, Arc::new(raw)));
                                    }
                                }

                                WireMessage::Presence { sender_id: sid, .. } => {
                                    // Fan out without interpretation.
                                    let outlet = {
                                        let mut sessions = sessions.write().await;
                                        sessions.get_mut(&session_id).map(|session| {
                                            session.last_active = Instant::now();
                                            session.broadcast.clone()
                                        })
                                    };
                                    if let Some(outlet) = outlet {
                                        let _ = outlet.send((sid, Arc::new(raw)));
                                    }
                                }

                                WireMessage::SyncResponse { .. } => {
                                    log::debug!("ignoring hub-bound sync-response from {addr}");
                                }
                            }
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("connection closed from {addr}");
                            break;
                        }

                        Some(Err(e)) => {
                            log::warn!("websocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                fanned = async {
                    match broadcast_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match fanned {
                        Ok((origin, raw)) => {
                            if Some(&origin) == sender_id.as_ref() {
                                continue; // never echo back to the sender
                            }
                            ws_sender
                                .send(Message::Text(raw.as_str().to_string().into()))
                                .await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("client {sender_id:?} lagged by {n} messages");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        // Cleanup: drop the client; an empty session starts its grace timer.
        if let Some(sid) = sender_id {
            let mut sessions_w = sessions.write().await;
            if let Some(session) = sessions_w.get_mut(&session_id) {
                session.clients.remove(&sid);
                if session.clients.is_empty() {
                    session.empty_since = Some(Instant::now());
                    Self::schedule_deletion(
                        sessions.clone(),
                        session_id.clone(),
                        config.empty_session_grace,
                    );
                }
            }
        }
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }

        Ok(())
    }

    /// Delete the session after the grace period if it is still empty.
    fn schedule_deletion(sessions: Sessions, session_id: String, grace: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut sessions = sessions.write().await;
            let expired = sessions
                .get(&session_id)
                .map(|s| {
                    s.clients.is_empty()
                        && s.empty_since.map_or(false, |since| since.elapsed() >= grace)
                })
                .unwrap_or(false);
            if expired {
                sessions.remove(&session_id);
                log::info!("session {session_id:?} removed after grace period");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = HubConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.empty_session_grace, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(600));
        assert_eq!(config.session_idle_timeout, Duration::from_secs(3600));
    }

    #[test]
    fn test_hub_creation() {
        let hub = SessionHub::with_defaults();
        assert_eq!(hub.bind_addr(), "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_stats_initial() {
        let hub = SessionHub::with_defaults();
        let stats = hub.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.active_sessions, 0);
    }

    #[test]
    fn test_session_document_is_seeded() {
        let session = Session::new(16);
        let blob = session.save();
        // A seeded document carries the shared history root.
        assert!(blob.len() > 2);

        let history = session.doc.get_or_insert_map("history");
        let txn = session.doc.transact();
        assert!(shared_history::is_seeded(&txn, &history));
    }

    #[test]
    fn test_session_apply_rejects_garbage() {
        let mut session = Session::new(16);
        assert!(session.apply(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_session_save_load_lineage() {
        // Two joiners loading the same session blob share one lineage.
        let session = Session::new(16);
        let blob = session.save();

        let a = Doc::new();
        let history_a = a.get_or_insert_map("history");
        {
            let mut txn = a.transact_mut();
            txn.apply_update(Update::decode_v1(&blob).unwrap()).unwrap();
        }
        let b = Doc::new();
        let history_b = b.get_or_insert_map("history");
        {
            let mut txn = b.transact_mut();
            txn.apply_update(Update::decode_v1(&blob).unwrap()).unwrap();
        }

        let txn_a = a.transact();
        let txn_b = b.transact();
        let snap_a = shared_history::snapshot(&txn_a, &history_a).unwrap();
        let snap_b = shared_history::snapshot(&txn_b, &history_b).unwrap();
        assert_eq!(snap_a.root_id, snap_b.root_id);
        assert_eq!(snap_a.current_node_id, snap_b.current_node_id);
    }
}
