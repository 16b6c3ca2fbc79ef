//! The closed family of reversible mutations over the curve store.
//!
//! Every command carries value copies of the data it needs to undo itself,
//! deep-copied at construction, so later mutation of the originals cannot
//! alter undo behavior. Commands whose target curve has disappeared execute
//! as silent no-ops but still enter history.
//!
//! The wire form is `{"kind": ..., "payload": ...}`; unknown kinds (the
//! reserved `ChangeCurveColor` among them) deserialize to nothing.

use serde::{Deserialize, Serialize};

use crate::curve::Curve;
use crate::geometry::Point;
use crate::palette::color_name;
use crate::store::CurveStore;

/// A reversible operation over the curve store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum Command {
    #[serde(rename_all = "camelCase")]
    AddPoint { curve_id: String, point: Point },
    #[serde(rename_all = "camelCase")]
    RemovePoint {
        curve_id: String,
        index: usize,
        point: Point,
    },
    #[serde(rename_all = "camelCase")]
    MovePoint {
        curve_id: String,
        index: usize,
        old_point: Point,
        new_point: Point,
    },
    AddCurve { curve: Curve },
    #[serde(rename_all = "camelCase")]
    RemoveCurve {
        curve: Curve,
        index: usize,
        /// Captured at construction: removing the last curve makes execute
        /// refill the store, and undo must pop that refill again. The flag
        /// is what lets undo tell the refill apart from an ordinary
        /// remaining empty curve.
        #[serde(default)]
        was_last_curve: bool,
    },
    #[serde(rename_all = "camelCase")]
    LoadCurves {
        new_curves: Vec<Curve>,
        old_curves: Vec<Curve>,
        old_active_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RemoteOverwrite { new_curves: Vec<Curve> },
}

impl Command {
    /// Apply the command's forward effect.
    pub fn execute(&self, store: &mut CurveStore) {
        match self {
            Command::AddPoint { curve_id, point } => {
                if let Some(curve) = store.curve_mut(curve_id) {
                    curve.points.push(*point);
                }
            }
            Command::RemovePoint {
                curve_id, index, ..
            } => {
                if let Some(curve) = store.curve_mut(curve_id) {
                    if *index < curve.points.len() {
                        curve.points.remove(*index);
                    }
                }
            }
            Command::MovePoint {
                curve_id,
                index,
                new_point,
                ..
            } => {
                if let Some(curve) = store.curve_mut(curve_id) {
                    if *index < curve.points.len() {
                        curve.points[*index] = *new_point;
                    }
                }
            }
            Command::AddCurve { curve } => {
                // Color and id come from the argument; points always start
                // empty regardless of what the argument carried.
                store
                    .curves_mut()
                    .push(Curve::with_id(curve.id.clone(), curve.color.clone()));
            }
            Command::RemoveCurve { curve, .. } => {
                if let Some(pos) = store.position_of(&curve.id) {
                    store.curves_mut().remove(pos);
                    // The store never goes empty through user action.
                    if store.curves().is_empty() {
                        store.add_curve();
                    }
                }
            }
            Command::LoadCurves { new_curves, .. } => {
                store.replace_curves(new_curves.clone());
                if let Some(first) = new_curves.first() {
                    store.set_active(&first.id);
                }
            }
            Command::RemoteOverwrite { new_curves } => {
                store.replace_curves(new_curves.clone());
            }
        }
    }

    /// Apply the command's inverse.
    ///
    /// Panics for `RemoteOverwrite`: that command never enters the local
    /// tree, so undoing it is a programming error.
    pub fn undo(&self, store: &mut CurveStore) {
        match self {
            Command::AddPoint { curve_id, .. } => {
                if let Some(curve) = store.curve_mut(curve_id) {
                    curve.points.pop();
                }
            }
            Command::RemovePoint {
                curve_id,
                index,
                point,
            } => {
                if let Some(curve) = store.curve_mut(curve_id) {
                    let at = (*index).min(curve.points.len());
                    curve.points.insert(at, *point);
                }
            }
            Command::MovePoint {
                curve_id,
                index,
                old_point,
                ..
            } => {
                if let Some(curve) = store.curve_mut(curve_id) {
                    if *index < curve.points.len() {
                        curve.points[*index] = *old_point;
                    }
                }
            }
            Command::AddCurve { curve } => {
                if let Some(pos) = store.position_of(&curve.id) {
                    store.curves_mut().remove(pos);
                    store.reconcile_active();
                }
            }
            Command::RemoveCurve {
                curve,
                index,
                was_last_curve,
            } => {
                // Execute refilled the store when it removed the last
                // curve; drop that refill before putting the original back.
                let pop_refill = *was_last_curve
                    && store.curves().len() == 1
                    && store.curves()[0].id != curve.id;
                if pop_refill {
                    store.curves_mut().clear();
                }
                let at = (*index).min(store.curves().len());
                store.curves_mut().insert(at, curve.clone());
                if pop_refill {
                    store.reconcile_active();
                }
            }
            Command::LoadCurves {
                old_curves,
                old_active_id,
                ..
            } => {
                store.replace_curves(old_curves.clone());
                match old_active_id {
                    Some(id) => store.set_active(id),
                    None => {
                        if let Some(first) = old_curves.first() {
                            store.set_active(&first.id);
                        }
                    }
                }
            }
            Command::RemoteOverwrite { .. } => {
                panic!("RemoteOverwrite has no undo; it must never enter the history tree");
            }
        }
    }

    /// The curve the coordinator should select after this command runs
    /// (or is undone back to).
    pub fn affected_curve_id(&self) -> Option<String> {
        match self {
            Command::AddPoint { curve_id, .. }
            | Command::RemovePoint { curve_id, .. }
            | Command::MovePoint { curve_id, .. } => Some(curve_id.clone()),
            Command::AddCurve { curve } | Command::RemoveCurve { curve, .. } => {
                Some(curve.id.clone())
            }
            Command::LoadCurves { new_curves, .. }
            | Command::RemoteOverwrite { new_curves } => {
                new_curves.first().map(|c| c.id.clone())
            }
        }
    }

    /// Human-readable description, resolved against the store the command
    /// is about to run on (for the target curve's color name).
    pub fn description(&self, store: &CurveStore) -> String {
        let name_of = |id: &str| {
            store
                .curve(id)
                .map(|c| color_name(&c.color))
                .unwrap_or("unknown")
        };
        match self {
            Command::AddPoint { curve_id, .. } => {
                format!("Add point to {} curve", name_of(curve_id))
            }
            Command::RemovePoint { curve_id, .. } => {
                format!("Remove point from {} curve", name_of(curve_id))
            }
            Command::MovePoint { curve_id, .. } => {
                format!("Move point on {} curve", name_of(curve_id))
            }
            Command::AddCurve { curve } => {
                format!("Add {} curve", color_name(&curve.color))
            }
            Command::RemoveCurve { curve, .. } => {
                format!("Remove {} curve", color_name(&curve.color))
            }
            Command::LoadCurves { new_curves, .. } => {
                format!("Load {} curves", new_curves.len())
            }
            Command::RemoteOverwrite { .. } => "Apply remote changes".to_string(),
        }
    }

    /// Serialize to the `{kind, payload}` wire form.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Deserialize from the wire form. Unknown kinds yield `None` and the
    /// caller skips the node.
    pub fn from_wire(json: &str) -> Option<Command> {
        serde_json::from_str(json).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_points(points: Vec<Point>) -> (CurveStore, String) {
        let mut store = CurveStore::new();
        store.set_active_points(points);
        let id = store.active_id().unwrap().to_string();
        (store, id)
    }

    fn state_of(store: &CurveStore) -> (Vec<Curve>, Option<String>) {
        (
            store.curves().to_vec(),
            store.active_id().map(str::to_string),
        )
    }

    #[test]
    fn test_add_point_roundtrip() {
        let (mut store, id) = store_with_points(vec![Point::new(1.0, 1.0)]);
        let before = state_of(&store);

        let cmd = Command::AddPoint {
            curve_id: id,
            point: Point::new(2.0, 2.0),
        };
        cmd.execute(&mut store);
        assert_eq!(store.active_points().len(), 2);
        cmd.undo(&mut store);
        assert_eq!(state_of(&store), before);
    }

    #[test]
    fn test_remove_point_roundtrip() {
        let (mut store, id) = store_with_points(vec![
            Point::new(1.0, 1.0),
            Point::new(2.0, 2.0),
            Point::new(3.0, 3.0),
        ]);
        let before = state_of(&store);

        let cmd = Command::RemovePoint {
            curve_id: id,
            index: 1,
            point: Point::new(2.0, 2.0),
        };
        cmd.execute(&mut store);
        assert_eq!(store.active_points().len(), 2);
        cmd.undo(&mut store);
        assert_eq!(state_of(&store), before);
    }

    #[test]
    fn test_move_point_roundtrip() {
        let (mut store, id) = store_with_points(vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0)]);
        let before = state_of(&store);

        let cmd = Command::MovePoint {
            curve_id: id,
            index: 0,
            old_point: Point::new(1.0, 1.0),
            new_point: Point::new(9.0, 9.0),
        };
        cmd.execute(&mut store);
        assert_eq!(store.active_points()[0], Point::new(9.0, 9.0));
        cmd.undo(&mut store);
        assert_eq!(state_of(&store), before);
    }

    #[test]
    fn test_add_curve_strips_points() {
        let mut store = CurveStore::new();
        let before = state_of(&store);

        let mut arg = Curve::with_id("c-new", "#ff4a9e");
        arg.points = vec![Point::new(5.0, 5.0)];
        let cmd = Command::AddCurve { curve: arg };
        cmd.execute(&mut store);

        let added = store.curve("c-new").unwrap();
        assert!(added.points.is_empty());
        assert_eq!(added.color, "#ff4a9e");

        cmd.undo(&mut store);
        assert_eq!(state_of(&store), before);
    }

    #[test]
    fn test_remove_curve_roundtrip() {
        let mut store = CurveStore::new();
        store.add_curve();
        let victim = store.curves()[0].clone();
        let before = state_of(&store);

        let cmd = Command::RemoveCurve {
            curve: victim.clone(),
            index: 0,
            was_last_curve: false,
        };
        cmd.execute(&mut store);
        assert!(store.curve(&victim.id).is_none());
        cmd.undo(&mut store);
        assert_eq!(state_of(&store), before);
    }

    #[test]
    fn test_remove_last_curve_refills_and_roundtrips() {
        let mut store = CurveStore::new();
        let only = store.curves()[0].clone();
        let before = state_of(&store);

        let cmd = Command::RemoveCurve {
            curve: only.clone(),
            index: 0,
            was_last_curve: true,
        };
        cmd.execute(&mut store);

        // The store refilled with a fresh empty curve in the next palette
        // color instead of going empty.
        assert_eq!(store.curves().len(), 1);
        let refill = &store.curves()[0];
        assert_ne!(refill.id, only.id);
        assert!(refill.points.is_empty());
        assert_eq!(refill.color, "#ff4a9e");
        assert_eq!(store.active_id(), Some(refill.id.as_str()));

        // Undo pops the refill and restores the original exactly.
        cmd.undo(&mut store);
        assert_eq!(state_of(&store), before);
    }

    #[test]
    fn test_load_curves_roundtrip() {
        let (mut store, _) = store_with_points(vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0)]);
        let before = state_of(&store);

        let mut red = Curve::with_id("red", "#ff4a9e");
        red.points = vec![Point::new(100.0, 200.0), Point::new(300.0, 400.0)];
        let cmd = Command::LoadCurves {
            new_curves: vec![red],
            old_curves: store.curves().to_vec(),
            old_active_id: store.active_id().map(str::to_string),
        };
        cmd.execute(&mut store);
        assert_eq!(store.active_id(), Some("red"));
        assert_eq!(store.curves().len(), 1);

        cmd.undo(&mut store);
        assert_eq!(state_of(&store), before);
    }

    #[test]
    fn test_missing_target_is_silent_noop() {
        let mut store = CurveStore::new();
        let before = state_of(&store);

        let cmd = Command::AddPoint {
            curve_id: "gone".to_string(),
            point: Point::new(1.0, 1.0),
        };
        cmd.execute(&mut store);
        cmd.undo(&mut store);
        assert_eq!(state_of(&store), before);
    }

    #[test]
    #[should_panic(expected = "RemoteOverwrite")]
    fn test_remote_overwrite_undo_is_fatal() {
        let mut store = CurveStore::new();
        let cmd = Command::RemoteOverwrite { new_curves: vec![] };
        cmd.undo(&mut store);
    }

    #[test]
    fn test_wire_roundtrip_preserves_effect() {
        let (mut store, id) = store_with_points(vec![Point::new(1.0, 1.0)]);
        let cmd = Command::AddPoint {
            curve_id: id,
            point: Point::new(7.0, 8.0),
        };

        let decoded = Command::from_wire(&cmd.to_wire()).unwrap();
        assert_eq!(decoded, cmd);

        let mut a = store.clone();
        cmd.execute(&mut a);
        decoded.execute(&mut store);
        assert_eq!(a.curves(), store.curves());
    }

    #[test]
    fn test_wire_shape() {
        let cmd = Command::AddPoint {
            curve_id: "c1".to_string(),
            point: Point::new(1.0, 2.0),
        };
        let json: serde_json::Value = serde_json::from_str(&cmd.to_wire()).unwrap();
        assert_eq!(json["kind"], "AddPoint");
        assert_eq!(json["payload"]["curveId"], "c1");
        assert_eq!(json["payload"]["point"]["x"], 1.0);
    }

    #[test]
    fn test_reserved_kind_yields_nothing() {
        let wire = r##"{"kind":"ChangeCurveColor","payload":{"curveId":"c1","color":"#4a9eff"}}"##;
        assert!(Command::from_wire(wire).is_none());
    }

    #[test]
    fn test_affected_curve_ids() {
        let cmd = Command::AddPoint {
            curve_id: "c1".to_string(),
            point: Point::new(0.0, 0.0),
        };
        assert_eq!(cmd.affected_curve_id().as_deref(), Some("c1"));

        let load = Command::LoadCurves {
            new_curves: vec![Curve::with_id("first", "#4a9eff")],
            old_curves: vec![],
            old_active_id: None,
        };
        assert_eq!(load.affected_curve_id().as_deref(), Some("first"));

        let empty = Command::RemoteOverwrite { new_curves: vec![] };
        assert_eq!(empty.affected_curve_id(), None);
    }

    #[test]
    fn test_descriptions_use_color_names() {
        let store = CurveStore::new();
        let id = store.active_id().unwrap().to_string();
        let cmd = Command::AddPoint {
            curve_id: id,
            point: Point::new(0.0, 0.0),
        };
        assert_eq!(cmd.description(&store), "Add point to blue curve");

        let unknown = Command::AddPoint {
            curve_id: "gone".to_string(),
            point: Point::new(0.0, 0.0),
        };
        assert_eq!(unknown.description(&store), "Add point to unknown curve");
    }
}
