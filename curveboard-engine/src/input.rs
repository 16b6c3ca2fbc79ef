//! The input-source interface.
//!
//! Pointer handling lives outside the engine; whatever implements it feeds
//! abstract point actions in and receives the active curve's points back
//! whenever history moves the state under it.

use curveboard_core::Point;

/// One abstract edit gesture against the active curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointAction {
    /// Append a point.
    Add { point: Point },
    /// Remove the point at `index`. Carries the removed value so the
    /// resulting command can restore it on undo.
    Remove { point: Point, index: usize },
    /// Move the point at `index` from `old_point` to `point`.
    Move {
        point: Point,
        index: usize,
        old_point: Point,
    },
}

/// Consumer of history-driven point updates.
pub trait InputSource {
    /// Reflect the active curve's points back into the input layer.
    fn set_points(&mut self, points: &[Point]);
}
