//! Presence: who is editing, where their cursor is, what they have selected.
//!
//! Presence records are non-authoritative metadata carried in the same
//! replicated document as the curves; each user upserts their own record.
//! Colors come from a palette disjoint from the curve palette and are
//! picked uniformly at random per user.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use curveboard_core::{Point, PRESENCE_PALETTE};

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Pick a presence color uniformly at random.
pub fn random_presence_color() -> &'static str {
    let idx = rand::thread_rng().gen_range(0..PRESENCE_PALETTE.len());
    PRESENCE_PALETTE[idx]
}

/// One collaborator's presence record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub color: String,
    pub cursor: Option<Point>,
    pub active_curve_id: Option<String>,
    /// Millisecond timestamp of the last presence upsert.
    pub last_seen: u64,
}

impl User {
    /// Fresh local identity with a random per-session id and color.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            color: random_presence_color().to_string(),
            cursor: None,
            active_curve_id: None,
            last_seen: now_ms(),
        }
    }
}
