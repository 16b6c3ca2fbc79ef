//! A curve: an ordered control polygon with a stable id and palette color.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::Point;

/// One editable curve. Point order is semantically significant: it defines
/// the evaluation order of the control polygon. A curve with fewer than two
/// points is inert (rendered but not evaluable); zero points is allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    pub id: String,
    pub color: String,
    pub points: Vec<Point>,
}

impl Curve {
    /// Create an empty curve with a fresh random id.
    pub fn new(color: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            color: color.into(),
            points: Vec::new(),
        }
    }

    /// Create with an explicit id (deserialization, tests).
    pub fn with_id(id: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            color: color.into(),
            points: Vec::new(),
        }
    }

    /// Inert curves cannot be evaluated.
    pub fn is_inert(&self) -> bool {
        self.points.len() < 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_curve_has_unique_id() {
        let a = Curve::new("#4a9eff");
        let b = Curve::new("#4a9eff");
        assert_ne!(a.id, b.id);
        assert!(a.points.is_empty());
    }

    #[test]
    fn test_inert_threshold() {
        let mut c = Curve::new("#4a9eff");
        assert!(c.is_inert());
        c.points.push(Point::new(0.0, 0.0));
        assert!(c.is_inert());
        c.points.push(Point::new(1.0, 1.0));
        assert!(!c.is_inert());
    }

    #[test]
    fn test_curve_json_shape() {
        let mut c = Curve::with_id("c1", "#ff4a9e");
        c.points.push(Point::new(1.0, 2.0));
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["id"], "c1");
        assert_eq!(json["color"], "#ff4a9e");
        assert_eq!(json["points"][0]["x"], 1.0);
        assert_eq!(json["points"][0]["y"], 2.0);
    }
}
