//! Curveboard session hub.
//!
//! Binds the websocket hub on the given address (first argument, defaults
//! to 127.0.0.1:8080) and relays curve-editing sessions until killed.

use log::info;

use curveboard_collab::server::{HubConfig, SessionHub};

#[tokio::main]
async fn main() {
    env_logger::init();

    let bind_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8080".to_string());
    let config = HubConfig {
        bind_addr,
        ..HubConfig::default()
    };

    let hub = SessionHub::new(config);
    info!("starting curveboard hub on {}", hub.bind_addr());
    if let Err(e) = hub.run().await {
        log::error!("hub terminated: {e}");
        std::process::exit(1);
    }
}
