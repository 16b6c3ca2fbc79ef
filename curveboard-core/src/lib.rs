//! # curveboard-core — document model for Curveboard
//!
//! Everything about a single replica's local state: the curve set, the
//! closed family of reversible commands, and the branching undo/redo tree.
//!
//! ```text
//! PointAction ──► Command ──► HistoryTree::execute_command
//!                                   │
//!                                   ▼
//!                              CurveStore  ──► snapshot for rendering
//! ```
//!
//! ## Modules
//!
//! - [`geometry`] — points and de Casteljau evaluation
//! - [`palette`] — fixed curve/presence palettes and color names
//! - [`curve`] — the curve value type
//! - [`store`] — the curve store and JSON persistence
//! - [`command`] — reversible mutations with a `{kind, payload}` wire form
//! - [`history`] — the branching undo tree

pub mod command;
pub mod curve;
pub mod geometry;
pub mod history;
pub mod palette;
pub mod store;

pub use command::Command;
pub use curve::Curve;
pub use geometry::{evaluate, sample, Point};
pub use history::{Branch, HistoryTree, IntersectionInfo, NodeId};
pub use palette::{color_name, CURVE_PALETTE, PRESENCE_PALETTE};
pub use store::{CurveStore, StoreError};
