//! # curveboard-collab — real-time collaboration layer for Curveboard
//!
//! Conflict-free multi-user editing over websockets, CRDT-backed.
//!
//! ```text
//! ┌──────────────┐      JSON frames       ┌──────────────┐
//! │ SessionClient│ ◄────────────────────► │ SessionHub   │
//! │  (per user)  │  change / presence     │ (per session)│
//! └──────┬───────┘                        └──────┬───────┘
//!        │                                       │
//!        ▼                                       ▼
//! ┌──────────────┐                        ┌──────────────┐
//! │ Replica      │                        │ authoritative│
//! │ (yrs Doc)    │                        │ Doc          │
//! └──────┬───────┘                        └──────────────┘
//!        │
//!        └── curves + users + shared history tree
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire messages (`sync-request`, `sync-response`,
//!   `change`, `presence`)
//! - [`replica`] — the replicated document wrapper
//! - [`shared_history`] — the history tree stored inside the CRDT
//! - [`presence`] — per-user presence records
//! - [`client`] — websocket session client with reconnect backoff
//! - [`server`] — the session hub (authoritative replica + relay)

pub mod client;
mod crdt;
pub mod presence;
pub mod protocol;
pub mod replica;
pub mod server;
pub mod shared_history;

pub use client::{ClientConfig, ConnectionState, SessionClient, SessionEvent};
pub use presence::{random_presence_color, User};
pub use protocol::{PresencePayload, ProtocolError, WireMessage};
pub use replica::{RemoteDelta, Replica, ReplicaError};
pub use server::{HubConfig, HubStats, SessionHub};
pub use shared_history::{SharedHistoryNode, SharedHistoryTree};
