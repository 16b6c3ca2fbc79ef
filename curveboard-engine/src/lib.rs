//! # curveboard-engine — editing-engine glue for Curveboard
//!
//! Ties the document model to the collaboration layer: the coordinator
//! ingests abstract input actions, routes undo/redo between the local tree
//! and the shared history, applies remote changes, and drives the renderer.
//!
//! ```text
//! input source ──► Coordinator ──► renderer
//!                     │  ▲
//!              outbox │  │ SessionEvent
//!                     ▼  │
//!                SessionClient ◄──► hub
//! ```

pub mod config;
pub mod coordinator;
pub mod input;
pub mod render;
pub mod session;

pub use config::SessionConfig;
pub use coordinator::{Coordinator, Outbound};
pub use input::{InputSource, PointAction};
pub use render::{RenderFrame, Renderer, VisualizationMode};
pub use session::SessionDriver;
