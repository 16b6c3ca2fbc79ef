//! The renderer interface.
//!
//! Rendering is external; the engine hands over plain snapshots and never
//! receives anything back.

use curveboard_core::{Curve, Point};

/// How curves are visualized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisualizationMode {
    #[default]
    Bezier,
    ControlPolygon,
}

/// One frame's worth of state for the renderer.
#[derive(Debug, Clone)]
pub struct RenderFrame {
    pub curves: Vec<Curve>,
    pub active_curve_id: Option<String>,
    /// Points of the parameter animation, when one is running.
    pub animated_points: Vec<Point>,
    pub visualization_mode: VisualizationMode,
    pub animation_progress: f64,
}

/// Consumer of render snapshots. No mutation path.
pub trait Renderer {
    fn render(&mut self, frame: &RenderFrame);
}
