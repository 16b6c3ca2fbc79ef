//! The history tree, mirrored inside the replicated document.
//!
//! Storing the full branching history in the CRDT makes undo/redo itself a
//! collaborative operation: moving `currentNodeId` is an ordinary document
//! mutation that merges like any other. Node links live in nested maps with
//! `childIds` arrays, so two peers appending children to the same parent
//! concurrently keep both branches.
//!
//! Layout under the `history` root map:
//!
//! ```text
//! history
//! ├── rootId:        <uuid>
//! ├── currentNodeId: <uuid>
//! └── nodes
//!     └── <uuid> ── { parentId, childIds[], command, userId,
//!                     timestampMs, description }
//! ```
//!
//! `command` is the `{kind, payload}` wire form, or null at the root. State
//! reconstruction walks a node's ancestry back to the root and replays the
//! deserialized commands against an empty store; unknown command kinds are
//! skipped.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yrs::{Any, Array, ArrayPrelim, ArrayRef, Map, MapPrelim, MapRef, ReadTxn, TransactionMut};

use curveboard_core::{Command, Curve, CurveStore};

use crate::crdt::{get_array, get_map, get_f64, get_string, string_items};
use crate::presence::now_ms;

/// Plain-value mirror of one shared history node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedHistoryNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub child_ids: Vec<String>,
    pub command: Option<Command>,
    pub user_id: String,
    pub timestamp_ms: u64,
    pub description: String,
}

/// Plain-value snapshot of the whole shared tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedHistoryTree {
    pub nodes: HashMap<String, SharedHistoryNode>,
    pub root_id: String,
    pub current_node_id: String,
}

pub(crate) fn is_seeded<T: ReadTxn>(txn: &T, history: &MapRef) -> bool {
    get_string(txn, history, "rootId").is_some()
}

/// Create the root node and pointers. Idempotent.
pub(crate) fn seed(txn: &mut TransactionMut, history: &MapRef) {
    if is_seeded(txn, history) {
        return;
    }
    let root_id = Uuid::new_v4().to_string();
    let nodes: MapRef = history.insert(txn, "nodes", MapPrelim::default());
    let root: MapRef = nodes.insert(txn, root_id.clone(), MapPrelim::default());
    root.insert(txn, "parentId", Any::Null);
    root.insert(txn, "command", Any::Null);
    root.insert(txn, "userId", "");
    root.insert(txn, "timestampMs", now_ms() as f64);
    root.insert(txn, "description", "Initial state");
    let _: ArrayRef = root.insert(txn, "childIds", ArrayPrelim::default());
    history.insert(txn, "rootId", root_id.clone());
    history.insert(txn, "currentNodeId", root_id);
}

/// Append a command node under the current node and move the current
/// pointer to it. Runs inside the same transaction that mutates the curves.
pub(crate) fn append_command(
    txn: &mut TransactionMut,
    history: &MapRef,
    cmd: &Command,
    user_id: &str,
    description: &str,
) -> Option<String> {
    let parent_id = get_string(txn, history, "currentNodeId")?;
    let nodes = get_map(txn, history, "nodes")?;

    let id = Uuid::new_v4().to_string();
    let node: MapRef = nodes.insert(txn, id.clone(), MapPrelim::default());
    node.insert(txn, "parentId", parent_id.clone());
    node.insert(txn, "command", cmd.to_wire());
    node.insert(txn, "userId", user_id);
    node.insert(txn, "timestampMs", now_ms() as f64);
    node.insert(txn, "description", description);
    let _: ArrayRef = node.insert(txn, "childIds", ArrayPrelim::default());

    if let Some(parent) = get_map(txn, &nodes, &parent_id) {
        if let Some(children) = get_array(txn, &parent, "childIds") {
            children.push_back(txn, id.clone());
        }
    }
    history.insert(txn, "currentNodeId", id.clone());
    Some(id)
}

pub(crate) fn current_node_id<T: ReadTxn>(txn: &T, history: &MapRef) -> Option<String> {
    get_string(txn, history, "currentNodeId")
}

pub(crate) fn set_current(txn: &mut TransactionMut, history: &MapRef, id: &str) {
    history.insert(txn, "currentNodeId", id);
}

/// Parent id of the current node, if any. Drives `canSharedUndo`.
pub(crate) fn parent_of_current<T: ReadTxn>(txn: &T, history: &MapRef) -> Option<String> {
    let current = current_node_id(txn, history)?;
    let nodes = get_map(txn, history, "nodes")?;
    let node = get_map(txn, &nodes, &current)?;
    get_string(txn, &node, "parentId")
}

/// First child id of the current node, if any. Shared redo always takes the
/// first child; shared mode exposes no branch choice.
pub(crate) fn first_child_of_current<T: ReadTxn>(txn: &T, history: &MapRef) -> Option<String> {
    let current = current_node_id(txn, history)?;
    let nodes = get_map(txn, history, "nodes")?;
    let node = get_map(txn, &nodes, &current)?;
    let children = get_array(txn, &node, "childIds")?;
    string_items(txn, &children).into_iter().next()
}

/// Curve state at `target`: replay its root-to-target command chain against
/// an empty store. Unknown kinds and missing nodes are skipped.
pub(crate) fn reconstruct<T: ReadTxn>(txn: &T, history: &MapRef, target: &str) -> Vec<Curve> {
    let Some(nodes) = get_map(txn, history, "nodes") else {
        return Vec::new();
    };

    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut at = Some(target.to_string());
    while let Some(id) = at {
        if !visited.insert(id.clone()) {
            break; // malformed remote data; never cycles by construction
        }
        let Some(node) = get_map(txn, &nodes, &id) else {
            break;
        };
        if let Some(wire) = get_string(txn, &node, "command") {
            chain.push(wire);
        }
        at = get_string(txn, &node, "parentId");
    }

    let mut store = CurveStore::empty();
    for wire in chain.into_iter().rev() {
        if let Some(cmd) = Command::from_wire(&wire) {
            cmd.execute(&mut store);
        }
    }
    store.curves().to_vec()
}

/// Full plain-value snapshot, or `None` before seeding.
pub(crate) fn snapshot<T: ReadTxn>(txn: &T, history: &MapRef) -> Option<SharedHistoryTree> {
    let root_id = get_string(txn, history, "rootId")?;
    let current_node_id = get_string(txn, history, "currentNodeId")?;
    let nodes_map = get_map(txn, history, "nodes")?;

    let keys: Vec<String> = nodes_map.keys(txn).map(|k| k.to_string()).collect();
    let mut nodes = HashMap::with_capacity(keys.len());
    for key in keys {
        let Some(node) = get_map(txn, &nodes_map, &key) else {
            continue;
        };
        let child_ids = get_array(txn, &node, "childIds")
            .map(|arr| string_items(txn, &arr))
            .unwrap_or_default();
        nodes.insert(
            key.clone(),
            SharedHistoryNode {
                id: key,
                parent_id: get_string(txn, &node, "parentId"),
                child_ids,
                command: get_string(txn, &node, "command")
                    .and_then(|wire| Command::from_wire(&wire)),
                user_id: get_string(txn, &node, "userId").unwrap_or_default(),
                timestamp_ms: get_f64(txn, &node, "timestampMs").unwrap_or(0.0) as u64,
                description: get_string(txn, &node, "description").unwrap_or_default(),
            },
        );
    }
    Some(SharedHistoryTree {
        nodes,
        root_id,
        current_node_id,
    })
}
