//! The replicated document: an opaque wrapper around a yrs `Doc`.
//!
//! Root layout:
//!
//! ```text
//! doc
//! ├── curves   Array[ Map{ id, color, points: Array[<point json>] } ]
//! ├── users    Map{ <user id> → <user json> }
//! └── history  shared history tree (see `shared_history`)
//! ```
//!
//! Curves are nested CRDT structures so concurrent point insertions on the
//! same curve merge as a multiset; user records are whole-value upserts.
//! Local transactions return the v1 update blob for broadcast; remote blobs
//! are applied commutatively, and the caller learns what changed through a
//! [`RemoteDelta`] of plain-value snapshots (obtained by full JSON
//! round-trip, never CRDT handles).
//!
//! The curves array is only ever spliced in place inside a transaction;
//! replacing it wholesale would break identity for the merge.

use std::collections::BTreeMap;

use thiserror::Error;
use yrs::updates::decoder::Decode;
use yrs::{
    Array, ArrayPrelim, ArrayRef, Doc, Map, MapPrelim, MapRef, ReadTxn, StateVector, Transact,
    TransactionMut, Update,
};

use curveboard_core::{Command, Curve, CurveStore, Point};

use crate::crdt::{get_array, get_string, map_items};
use crate::presence::{now_ms, User};
use crate::shared_history::{self, SharedHistoryTree};

/// An empty v1 update encodes to two zero bytes; anything longer carries an
/// effective change.
const EMPTY_UPDATE_LEN: usize = 2;

#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("malformed change blob: {0}")]
    Decode(String),
    #[error("change blob failed to merge: {0}")]
    Merge(String),
}

/// What changed in a remote apply, as plain values. Each field is `Some`
/// only when its serialized subtree differs from before the apply.
#[derive(Debug, Default)]
pub struct RemoteDelta {
    pub curves: Option<Vec<Curve>>,
    pub users: Option<Vec<User>>,
    pub history: Option<SharedHistoryTree>,
}

impl RemoteDelta {
    pub fn is_empty(&self) -> bool {
        self.curves.is_none() && self.users.is_none() && self.history.is_none()
    }
}

/// One replica of the shared document.
pub struct Replica {
    doc: Doc,
    curves: ArrayRef,
    users: MapRef,
    history: MapRef,
    user: User,
}

impl Replica {
    /// A fresh, unseeded replica for the given local user name.
    pub fn new(user_name: impl Into<String>) -> Self {
        let doc = Doc::new();
        let curves = doc.get_or_insert_array("curves");
        let users = doc.get_or_insert_map("users");
        let history = doc.get_or_insert_map("history");
        Self {
            doc,
            curves,
            users,
            history,
            user: User::new(user_name),
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    /// Seed the shared history root. The hub does this when it creates a
    /// session, so every joiner shares one lineage.
    pub fn seed_history(&mut self) {
        let history = self.history.clone();
        let mut txn = self.doc.transact_mut();
        shared_history::seed(&mut txn, &history);
    }

    pub fn is_history_seeded(&self) -> bool {
        let txn = self.doc.transact();
        shared_history::is_seeded(&txn, &self.history)
    }

    /// Run a named local transaction and return its delta, or `None` when
    /// the mutator produced no effective change.
    pub fn execute_local_command(
        &mut self,
        description: &str,
        mutate: impl FnOnce(&mut TransactionMut),
    ) -> Option<Vec<u8>> {
        let update = {
            let mut txn = self.doc.transact_mut();
            mutate(&mut txn);
            txn.encode_update_v1()
        };
        if update.len() <= EMPTY_UPDATE_LEN {
            log::debug!("transaction {description:?} produced no change");
            return None;
        }
        log::debug!("transaction {description:?}: {} byte delta", update.len());
        Some(update)
    }

    /// Mirror a locally executed command: mutate the curves and append the
    /// matching shared history node in one transaction.
    pub fn commit_command(&mut self, cmd: &Command, description: &str) -> Option<Vec<u8>> {
        let curves = self.curves.clone();
        let history = self.history.clone();
        let user_id = self.user.id.clone();
        self.execute_local_command(description, |txn| {
            // An offline-started replica seeds its own lineage lazily.
            shared_history::seed(txn, &history);
            apply_command(txn, &curves, cmd);
            shared_history::append_command(txn, &history, cmd, &user_id, description);
        })
    }

    /// Upsert the local user's presence record.
    pub fn update_presence(
        &mut self,
        cursor: Option<Point>,
        active_curve_id: Option<String>,
        name: &str,
    ) -> Option<Vec<u8>> {
        self.user.cursor = cursor;
        self.user.active_curve_id = active_curve_id;
        self.user.name = name.to_string();
        self.user.last_seen = now_ms();

        let users = self.users.clone();
        let record = serde_json::to_string(&self.user).ok()?;
        let user_id = self.user.id.clone();
        self.execute_local_command("Update presence", |txn| {
            users.insert(txn, user_id, record);
        })
    }

    /// Apply a peer's delta. Returns which subtrees changed, as plain
    /// values. Malformed blobs fail without touching the document.
    pub fn apply_remote_changes(&mut self, blob: &[u8]) -> Result<RemoteDelta, ReplicaError> {
        let update = Update::decode_v1(blob).map_err(|e| ReplicaError::Decode(e.to_string()))?;
        let before = self.serialized_state();
        {
            let mut txn = self.doc.transact_mut();
            txn.apply_update(update)
                .map_err(|e| ReplicaError::Merge(e.to_string()))?;
        }
        Ok(self.delta_since(&before))
    }

    /// Full-state save blob.
    pub fn save(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Load a full-state blob. With `skip_rebroadcast` the change report is
    /// suppressed (the caller is about to overwrite its view anyway).
    pub fn load(
        &mut self,
        blob: &[u8],
        skip_rebroadcast: bool,
    ) -> Result<Option<RemoteDelta>, ReplicaError> {
        if skip_rebroadcast {
            let update =
                Update::decode_v1(blob).map_err(|e| ReplicaError::Decode(e.to_string()))?;
            let mut txn = self.doc.transact_mut();
            txn.apply_update(update)
                .map_err(|e| ReplicaError::Merge(e.to_string()))?;
            Ok(None)
        } else {
            self.apply_remote_changes(blob).map(Some)
        }
    }

    // ── shared undo/redo ────────────────────────────────────────────

    pub fn can_shared_undo(&self) -> bool {
        let txn = self.doc.transact();
        shared_history::parent_of_current(&txn, &self.history).is_some()
    }

    pub fn can_shared_redo(&self) -> bool {
        let txn = self.doc.transact();
        shared_history::first_child_of_current(&txn, &self.history).is_some()
    }

    /// Move the shared current pointer to its parent and splice the
    /// reconstructed curves into the document.
    pub fn shared_undo(&mut self) -> Option<(Vec<u8>, Vec<Curve>)> {
        let target = {
            let txn = self.doc.transact();
            shared_history::parent_of_current(&txn, &self.history)?
        };
        self.move_shared_current(&target, "Shared undo")
    }

    /// Move the shared current pointer to its first child. Shared mode has
    /// no branch choice.
    pub fn shared_redo(&mut self) -> Option<(Vec<u8>, Vec<Curve>)> {
        let target = {
            let txn = self.doc.transact();
            shared_history::first_child_of_current(&txn, &self.history)?
        };
        self.move_shared_current(&target, "Shared redo")
    }

    fn move_shared_current(
        &mut self,
        target: &str,
        description: &str,
    ) -> Option<(Vec<u8>, Vec<Curve>)> {
        let reconstructed = {
            let txn = self.doc.transact();
            shared_history::reconstruct(&txn, &self.history, target)
        };
        let curves = self.curves.clone();
        let history = self.history.clone();
        let target = target.to_string();
        let splice = reconstructed.clone();
        let blob = self.execute_local_command(description, move |txn| {
            shared_history::set_current(txn, &history, &target);
            splice_curves(txn, &curves, &splice);
        })?;
        Some((blob, reconstructed))
    }

    // ── plain-value snapshots ───────────────────────────────────────

    /// Current curves as plain values.
    pub fn curves(&self) -> Vec<Curve> {
        let txn = self.doc.transact();
        read_curves(&txn, &self.curves)
    }

    /// All presence records, ordered by user id.
    pub fn users(&self) -> Vec<User> {
        let txn = self.doc.transact();
        read_users(&txn, &self.users).into_values().collect()
    }

    /// Shared history snapshot, or `None` before seeding.
    pub fn shared_history(&self) -> Option<SharedHistoryTree> {
        let txn = self.doc.transact();
        shared_history::snapshot(&txn, &self.history)
    }

    /// Serialized (curves, users, history) for diff-driven change
    /// detection.
    fn serialized_state(&self) -> (String, String, String) {
        let txn = self.doc.transact();
        let curves = serde_json::to_string(&read_curves(&txn, &self.curves)).unwrap_or_default();
        let users = serde_json::to_string(&read_users(&txn, &self.users)).unwrap_or_default();
        let history = shared_history::snapshot(&txn, &self.history)
            .and_then(|s| serde_json::to_string(&s).ok())
            .unwrap_or_default();
        (curves, users, history)
    }

    fn delta_since(&self, before: &(String, String, String)) -> RemoteDelta {
        let after = self.serialized_state();
        let txn = self.doc.transact();
        RemoteDelta {
            curves: (after.0 != before.0).then(|| read_curves(&txn, &self.curves)),
            users: (after.1 != before.1)
                .then(|| read_users(&txn, &self.users).into_values().collect()),
            history: if after.2 != before.2 {
                shared_history::snapshot(&txn, &self.history)
            } else {
                None
            },
        }
    }
}

// ── curve codec over yrs values ─────────────────────────────────────

fn point_wire(point: &Point) -> String {
    serde_json::to_string(point).unwrap_or_else(|_| "{}".to_string())
}

fn write_curve(txn: &mut TransactionMut, curves: &ArrayRef, curve: &Curve, with_points: bool) {
    let map: MapRef = curves.push_back(txn, MapPrelim::default());
    map.insert(txn, "id", curve.id.clone());
    map.insert(txn, "color", curve.color.clone());
    let points: ArrayRef = map.insert(txn, "points", ArrayPrelim::default());
    if with_points {
        for point in &curve.points {
            points.push_back(txn, point_wire(point));
        }
    }
}

fn find_curve<T: ReadTxn>(txn: &T, curves: &ArrayRef, id: &str) -> Option<(u32, MapRef)> {
    for (i, map) in map_items(txn, curves).into_iter().enumerate() {
        if get_string(txn, &map, "id").as_deref() == Some(id) {
            return Some((i as u32, map));
        }
    }
    None
}

fn read_curves<T: ReadTxn>(txn: &T, curves: &ArrayRef) -> Vec<Curve> {
    map_items(txn, curves)
        .into_iter()
        .filter_map(|map| {
            let id = get_string(txn, &map, "id")?;
            let color = get_string(txn, &map, "color")?;
            let points = get_array(txn, &map, "points")
                .map(|arr| {
                    crate::crdt::string_items(txn, &arr)
                        .iter()
                        .filter_map(|s| serde_json::from_str::<Point>(s).ok())
                        .collect()
                })
                .unwrap_or_default();
            Some(Curve { id, color, points })
        })
        .collect()
}

fn read_users<T: ReadTxn>(txn: &T, users: &MapRef) -> BTreeMap<String, User> {
    let keys: Vec<String> = users.keys(txn).map(|k| k.to_string()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let record = get_string(txn, users, &key)?;
            serde_json::from_str::<User>(&record).ok()
        })
        .map(|user| (user.id.clone(), user))
        .collect()
}

/// Replace the whole curve sequence in place.
fn splice_curves(txn: &mut TransactionMut, curves: &ArrayRef, replacement: &[Curve]) {
    let len = curves.len(txn);
    if len > 0 {
        curves.remove_range(txn, 0, len);
    }
    for curve in replacement {
        write_curve(txn, curves, curve, true);
    }
}

/// Mirror a command's store mutation onto the CRDT curves.
fn apply_command(txn: &mut TransactionMut, curves: &ArrayRef, cmd: &Command) {
    match cmd {
        Command::AddPoint { curve_id, point } => {
            if let Some((_, map)) = find_curve(txn, curves, curve_id) {
                if let Some(points) = get_array(txn, &map, "points") {
                    points.push_back(txn, point_wire(point));
                }
            }
        }
        Command::RemovePoint {
            curve_id, index, ..
        } => {
            if let Some((_, map)) = find_curve(txn, curves, curve_id) {
                if let Some(points) = get_array(txn, &map, "points") {
                    if (*index as u32) < points.len(txn) {
                        points.remove(txn, *index as u32);
                    }
                }
            }
        }
        Command::MovePoint {
            curve_id,
            index,
            new_point,
            ..
        } => {
            if let Some((_, map)) = find_curve(txn, curves, curve_id) {
                if let Some(points) = get_array(txn, &map, "points") {
                    let i = *index as u32;
                    if i < points.len(txn) {
                        points.remove(txn, i);
                        points.insert(txn, i, point_wire(new_point));
                    }
                }
            }
        }
        Command::AddCurve { curve } => {
            write_curve(txn, curves, curve, false);
        }
        Command::RemoveCurve { curve, .. } => {
            if let Some((i, _)) = find_curve(txn, curves, &curve.id) {
                curves.remove(txn, i);
            }
        }
        Command::LoadCurves { new_curves, .. } => {
            splice_curves(txn, curves, new_curves);
        }
        Command::RemoteOverwrite { new_curves } => {
            splice_curves(txn, curves, new_curves);
        }
    }
}
