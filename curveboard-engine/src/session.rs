//! Session driver: pumps messages between the coordinator and the
//! websocket client.
//!
//! The coordinator is synchronous and single-owner; the transport is async.
//! The driver bridges the two: the application drains coordinator outbox
//! messages into [`SessionDriver::flush`], and polls
//! [`SessionDriver::poll_events`] to feed transport events back into the
//! coordinator between edits.

use tokio::sync::mpsc;

use curveboard_collab::{SessionClient, SessionEvent};

use crate::config::SessionConfig;
use crate::coordinator::Outbound;

/// Owns the running session client and its event stream.
pub struct SessionDriver {
    client: SessionClient,
    events: mpsc::Receiver<SessionEvent>,
}

impl SessionDriver {
    /// Start a client for the session. `sender_id` should be the replica's
    /// user id so peers can correlate changes with presence.
    pub fn start(config: &SessionConfig, sender_id: &str) -> Self {
        let mut client = SessionClient::with_sender_id(sender_id, config.client_config());
        let events = client
            .take_event_rx()
            .expect("fresh client always has an event receiver");
        client.start();
        Self { client, events }
    }

    pub fn client(&self) -> &SessionClient {
        &self.client
    }

    /// Transport events that arrived since the last poll.
    pub fn poll_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait for the next transport event.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Hand the coordinator's queued messages to the transport.
    pub async fn flush(&self, outbox: Vec<Outbound>) {
        for outbound in outbox {
            match outbound {
                Outbound::Change(changes) => self.client.send_change(changes).await,
                Outbound::Presence(presence) => self.client.send_presence(presence).await,
            }
        }
    }
}
