//! The curve store: the set of curves plus the active selection.
//!
//! Invariants:
//! - curve ids are unique
//! - `active_id`, when set, names an existing curve
//! - the store never becomes empty through user action; removing the last
//!   curve immediately creates a fresh empty curve with the next palette
//!   color

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::curve::Curve;
use crate::geometry::{sample, Point};
use crate::palette::CURVE_PALETTE;

/// Parameter steps used when hit-testing a curve against a position.
const HIT_TEST_STEPS: usize = 50;

/// Errors surfaced when loading documents from JSON.
///
/// Network and replication errors are logged and dropped elsewhere; these
/// are user-initiated data errors and carry the specific reason.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid document JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("curve {0} has a non-finite coordinate")]
    NonFiniteCoordinate(String),
    #[error("duplicate curve id {0}")]
    DuplicateCurveId(String),
    #[error("active curve id {0} does not match any curve")]
    UnknownActiveCurve(String),
}

/// Persistent document shape.
#[derive(Debug, Serialize, Deserialize)]
struct DocumentJson {
    curves: Vec<Curve>,
    #[serde(
        rename = "activeCurveId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    active_curve_id: Option<String>,
}

/// Legacy single-curve shape: `{"points": [...]}`.
#[derive(Debug, Deserialize)]
struct LegacyDocumentJson {
    points: Vec<Point>,
}

/// Ordered set of curves with one optional active selection.
#[derive(Debug, Clone)]
pub struct CurveStore {
    curves: Vec<Curve>,
    active_id: Option<String>,
    next_color: usize,
}

impl CurveStore {
    /// A store seeded with one empty curve in the first palette color.
    pub fn new() -> Self {
        let mut store = Self::empty();
        let id = store.add_curve();
        store.active_id = Some(id);
        store
    }

    /// A store with no curves at all. Used for history replay, where the
    /// replayed commands themselves build up the curve set.
    pub fn empty() -> Self {
        Self {
            curves: Vec::new(),
            active_id: None,
            next_color: 0,
        }
    }

    pub fn curves(&self) -> &[Curve] {
        &self.curves
    }

    pub fn curves_mut(&mut self) -> &mut Vec<Curve> {
        &mut self.curves
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn curve(&self, id: &str) -> Option<&Curve> {
        self.curves.iter().find(|c| c.id == id)
    }

    pub fn curve_mut(&mut self, id: &str) -> Option<&mut Curve> {
        self.curves.iter_mut().find(|c| c.id == id)
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.curves.iter().position(|c| c.id == id)
    }

    /// Append a fresh empty curve in the next palette color and make it
    /// active. Returns the new curve's id.
    pub fn add_curve(&mut self) -> String {
        let color = CURVE_PALETTE[self.next_color % CURVE_PALETTE.len()];
        self.next_color += 1;
        let curve = Curve::new(color);
        let id = curve.id.clone();
        self.curves.push(curve);
        self.active_id = Some(id.clone());
        id
    }

    /// Remove a curve by id. If it was active, the first remaining curve
    /// becomes active; if none remain, a fresh empty curve is created.
    pub fn remove_curve(&mut self, id: &str) {
        let Some(pos) = self.position_of(id) else {
            return;
        };
        self.curves.remove(pos);
        if self.curves.is_empty() {
            self.add_curve();
        } else if self.active_id.as_deref() == Some(id) {
            self.active_id = Some(self.curves[0].id.clone());
        }
    }

    /// Set the active curve; ignored when the id is unknown.
    pub fn set_active(&mut self, id: &str) {
        if self.curve(id).is_some() {
            self.active_id = Some(id.to_string());
        }
    }

    /// Points of the active curve (empty when nothing is active).
    pub fn active_points(&self) -> &[Point] {
        self.active_id
            .as_deref()
            .and_then(|id| self.curve(id))
            .map(|c| c.points.as_slice())
            .unwrap_or(&[])
    }

    /// Replace the active curve's points wholesale.
    pub fn set_active_points(&mut self, points: Vec<Point>) {
        if let Some(id) = self.active_id.clone() {
            if let Some(curve) = self.curve_mut(&id) {
                curve.points = points;
            }
        }
    }

    /// Drop every curve and start over with one empty curve.
    pub fn clear_all(&mut self) {
        self.curves.clear();
        self.active_id = None;
        self.add_curve();
    }

    /// Replace the whole curve sequence, keeping the active id when it still
    /// names a curve and falling back to the first curve otherwise.
    pub fn replace_curves(&mut self, curves: Vec<Curve>) {
        self.curves = curves;
        self.reconcile_active();
    }

    /// Restore the active-id invariant after an arbitrary mutation.
    pub fn reconcile_active(&mut self) {
        let valid = self
            .active_id
            .as_deref()
            .map(|id| self.curve(id).is_some())
            .unwrap_or(false);
        if !valid {
            self.active_id = self.curves.first().map(|c| c.id.clone());
        }
    }

    /// Id of the first curve whose sampled polyline comes within `threshold`
    /// of `position`. Inert curves are skipped.
    pub fn find_curve_at_position(&self, position: Point, threshold: f64) -> Option<&str> {
        for curve in &self.curves {
            let hit = sample(&curve.points, HIT_TEST_STEPS)
                .iter()
                .any(|p| p.distance(&position) <= threshold);
            if hit {
                return Some(&curve.id);
            }
        }
        None
    }

    /// Serialize to the persistent document shape.
    pub fn to_json(&self) -> String {
        let doc = DocumentJson {
            curves: self.curves.clone(),
            active_curve_id: self.active_id.clone(),
        };
        serde_json::to_string(&doc).unwrap_or_else(|_| "{}".to_string())
    }

    /// Load from JSON, accepting the current multi-curve shape and the
    /// legacy single-curve shape. On any failure the store is unchanged.
    pub fn from_json(&mut self, json: &str) -> Result<(), StoreError> {
        let loaded = parse_document(json)?;
        validate_document(&loaded)?;

        self.curves = loaded.curves;
        self.active_id = loaded.active_curve_id;
        self.next_color = self.curves.len();
        if self.curves.is_empty() {
            self.add_curve();
        }
        self.reconcile_active();
        Ok(())
    }
}

impl Default for CurveStore {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_document(json: &str) -> Result<DocumentJson, StoreError> {
    let primary_err = match serde_json::from_str::<DocumentJson>(json) {
        Ok(doc) => return Ok(doc),
        Err(e) => e,
    };
    if let Ok(legacy) = serde_json::from_str::<LegacyDocumentJson>(json) {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let mut curve = Curve::with_id(format!("curve-{epoch_ms}"), CURVE_PALETTE[0]);
        curve.points = legacy.points;
        let id = curve.id.clone();
        return Ok(DocumentJson {
            curves: vec![curve],
            active_curve_id: Some(id),
        });
    }
    Err(StoreError::Json(primary_err))
}

fn validate_document(doc: &DocumentJson) -> Result<(), StoreError> {
    let mut seen = std::collections::HashSet::new();
    for curve in &doc.curves {
        if !seen.insert(curve.id.as_str()) {
            return Err(StoreError::DuplicateCurveId(curve.id.clone()));
        }
        if curve.points.iter().any(|p| !p.is_finite()) {
            return Err(StoreError::NonFiniteCoordinate(curve.id.clone()));
        }
    }
    if let Some(active) = &doc.active_curve_id {
        if !doc.curves.iter().any(|c| &c.id == active) {
            return Err(StoreError::UnknownActiveCurve(active.clone()));
        }
    }
    Ok(())
}
