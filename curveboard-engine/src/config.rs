//! Session configuration.

use curveboard_collab::ClientConfig;

/// Engine-level session settings: where the hub lives and whether
/// collaboration is on. Everything else is fixed by the protocol.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hub websocket URL.
    pub hub_url: String,
    /// Session token to join.
    pub session_id: String,
    /// Runtime collaboration toggle.
    pub collaboration_enabled: bool,
    /// Display name for presence.
    pub user_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hub_url: "ws://localhost:8080".to_string(),
            session_id: "default".to_string(),
            collaboration_enabled: false,
            user_name: "Anonymous".to_string(),
        }
    }
}

impl SessionConfig {
    /// The transport-level configuration for this session.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            hub_url: self.hub_url.clone(),
            session_id: self.session_id.clone(),
        }
    }
}
