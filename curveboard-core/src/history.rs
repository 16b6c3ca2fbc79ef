//! Branching undo/redo history.
//!
//! Executed commands form a tree, not a stack: executing a new command while
//! the current node already has children appends a sibling instead of
//! truncating, so every edit preserves prior futures. A single `current`
//! pointer designates the live state; `selected_child` disambiguates which
//! child the next redo takes when the current node is an intersection.
//!
//! Nodes live in an arena (`Vec` indices for parent/children), which keeps
//! the parent/child graph cycle-free by construction: only
//! `execute_command` creates nodes, always as a child of `current`.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::command::Command;
use crate::store::CurveStore;

/// Arena index of a history node.
pub type NodeId = usize;

const ROOT: NodeId = 0;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One executed command and its place in the tree. The root carries no
/// command.
#[derive(Debug)]
pub struct HistoryNode {
    pub command: Option<Command>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub timestamp_ms: u64,
    pub description: String,
}

/// One alternative future at a junction, identified by the furthest node
/// reachable along first children.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub node: NodeId,
    pub description: String,
    pub is_current: bool,
}

/// What the UI shows while the user cycles branches at an intersection.
#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionInfo {
    pub current_branch: usize,
    pub total_branches: usize,
    pub description: String,
}

/// Hook invoked after every locally executed command, carrying the command
/// and its description. The collaboration layer registers one to mirror the
/// command into the replicated document.
pub type CommandHook = Box<dyn FnMut(&Command, &str) + Send>;

/// The branching history tree.
pub struct HistoryTree {
    nodes: Vec<HistoryNode>,
    current: NodeId,
    selected_child: usize,
    on_command: Option<CommandHook>,
}

impl HistoryTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![HistoryNode {
                command: None,
                parent: None,
                children: Vec::new(),
                timestamp_ms: now_ms(),
                description: "Initial state".to_string(),
            }],
            current: ROOT,
            selected_child: 0,
            on_command: None,
        }
    }

    /// Register the collaboration hook.
    pub fn set_on_command(&mut self, hook: CommandHook) {
        self.on_command = Some(hook);
    }

    pub fn current(&self) -> NodeId {
        self.current
    }

    pub fn node(&self, id: NodeId) -> &HistoryNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Execute a command and append it as a new child of `current`.
    /// Existing children are preserved: this is how branches form.
    pub fn execute_command(&mut self, cmd: Command, store: &mut CurveStore) -> Option<String> {
        let description = cmd.description(store);
        cmd.execute(store);
        let affected = cmd.affected_curve_id();

        let id = self.nodes.len();
        self.nodes.push(HistoryNode {
            command: Some(cmd),
            parent: Some(self.current),
            children: Vec::new(),
            timestamp_ms: now_ms(),
            description: description.clone(),
        });
        self.nodes[self.current].children.push(id);
        self.current = id;
        self.selected_child = 0;

        if let Some(hook) = self.on_command.as_mut() {
            if let Some(command) = self.nodes[id].command.as_ref() {
                hook(command, &description);
            }
        }
        affected
    }

    /// Apply a command to the store without touching the tree. Used for
    /// remote overwrites, which must not become local history.
    pub fn execute_remote_command(&self, cmd: &Command, store: &mut CurveStore) {
        cmd.execute(store);
    }

    pub fn can_undo(&self) -> bool {
        self.nodes[self.current].parent.is_some()
    }

    pub fn can_redo(&self) -> bool {
        !self.nodes[self.current].children.is_empty()
    }

    /// Undo the current node's command and move to its parent. Returns the
    /// new current's affected curve id (root yields `None`).
    pub fn undo(&mut self, store: &mut CurveStore) -> Option<String> {
        let parent = self.nodes[self.current].parent?;
        if let Some(cmd) = self.nodes[self.current].command.as_ref() {
            cmd.undo(store);
        }
        // Keep the redo path pointed back at where we came from.
        self.selected_child = self.nodes[parent]
            .children
            .iter()
            .position(|&c| c == self.current)
            .unwrap_or(0);
        self.current = parent;
        self.nodes[self.current]
            .command
            .as_ref()
            .and_then(Command::affected_curve_id)
    }

    /// Redo into `children[selected_child]` (clamped). Returns the affected
    /// curve id of the re-executed command.
    pub fn redo(&mut self, store: &mut CurveStore) -> Option<String> {
        let children = &self.nodes[self.current].children;
        if children.is_empty() {
            return None;
        }
        let idx = self.selected_child.min(children.len() - 1);
        let child = children[idx];
        self.step_into(child, store);
        self.nodes[self.current]
            .command
            .as_ref()
            .and_then(Command::affected_curve_id)
    }

    fn step_into(&mut self, child: NodeId, store: &mut CurveStore) {
        if let Some(cmd) = self.nodes[child].command.as_ref() {
            cmd.execute(store);
        }
        self.current = child;
        self.selected_child = 0;
    }

    /// Whether current has more than one child.
    pub fn is_at_intersection(&self) -> bool {
        self.nodes[self.current].children.len() > 1
    }

    /// Cycle the selected child forward. State does not change; the choice
    /// takes effect on the next redo or jump.
    pub fn switch_to_next_branch(&mut self) {
        let n = self.nodes[self.current].children.len();
        if n > 1 {
            self.selected_child = (self.selected_child + 1) % n;
        }
    }

    /// Cycle the selected child backward.
    pub fn switch_to_previous_branch(&mut self) {
        let n = self.nodes[self.current].children.len();
        if n > 1 {
            self.selected_child = (self.selected_child + n - 1) % n;
        }
    }

    /// Intersection summary for the UI, or `None` when not at one.
    pub fn get_intersection_info(&self) -> Option<IntersectionInfo> {
        let children = &self.nodes[self.current].children;
        if children.len() <= 1 {
            return None;
        }
        let idx = self.selected_child.min(children.len() - 1);
        Some(IntersectionInfo {
            current_branch: idx + 1,
            total_branches: children.len(),
            description: self.nodes[children[idx]].description.clone(),
        })
    }

    /// Path of node ids from root to current, inclusive.
    fn path_to_current(&self) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut at = Some(self.current);
        while let Some(id) = at {
            path.push(id);
            at = self.nodes[id].parent;
        }
        path.reverse();
        path
    }

    /// Furthest descendant of `id` following first children.
    fn tip_of(&self, id: NodeId) -> NodeId {
        let mut at = id;
        while let Some(&first) = self.nodes[at].children.first() {
            at = first;
        }
        at
    }

    /// Every alternative at every junction along the root-to-current path,
    /// in root-to-current order. Each entry names the branch's tip so a
    /// switch restores the whole alternative future; `is_current` marks the
    /// child the current path runs through.
    pub fn get_branches(&self) -> Vec<Branch> {
        let path = self.path_to_current();
        let on_path: HashSet<NodeId> = path.iter().copied().collect();

        let mut branches = Vec::new();
        // Junctions are interior path nodes; the current node's own children
        // are futures handled by intersection cycling, not branch listing.
        for &id in path.iter().take(path.len().saturating_sub(1)) {
            if self.nodes[id].children.len() <= 1 {
                continue;
            }
            for &child in &self.nodes[id].children {
                let is_current = on_path.contains(&child);
                let tip = if is_current {
                    self.current
                } else {
                    self.tip_of(child)
                };
                branches.push(Branch {
                    node: tip,
                    description: self.nodes[tip].description.clone(),
                    is_current,
                });
            }
        }
        branches
    }

    fn common_ancestor(&self, a: NodeId, b: NodeId) -> NodeId {
        let mut seen = HashSet::new();
        let mut at = Some(a);
        while let Some(id) = at {
            seen.insert(id);
            at = self.nodes[id].parent;
        }
        let mut at = Some(b);
        while let Some(id) = at {
            if seen.contains(&id) {
                return id;
            }
            at = self.nodes[id].parent;
        }
        ROOT
    }

    /// Move the live state to `target`: undo up to the common ancestor,
    /// then execute down the target's path.
    pub fn switch_to_branch(&mut self, target: NodeId, store: &mut CurveStore) -> Option<String> {
        if target >= self.nodes.len() || target == self.current {
            return None;
        }
        let ancestor = self.common_ancestor(self.current, target);

        while self.current != ancestor {
            self.undo(store);
        }

        // Collect ancestor -> target, exclusive of the ancestor.
        let mut descent = Vec::new();
        let mut at = target;
        while at != ancestor {
            descent.push(at);
            match self.nodes[at].parent {
                Some(p) => at = p,
                None => break,
            }
        }
        for id in descent.into_iter().rev() {
            self.step_into(id, store);
        }
        self.nodes[self.current]
            .command
            .as_ref()
            .and_then(Command::affected_curve_id)
    }

    /// Redo along the selected child, then first children, stopping at the
    /// first node with zero or multiple children.
    pub fn jump_to_next_intersection_or_end(&mut self, store: &mut CurveStore) -> Option<String> {
        let mut affected = None;
        if self.can_redo() {
            affected = self.redo(store);
        }
        while self.nodes[self.current].children.len() == 1 {
            affected = self.redo(store);
        }
        affected
    }

    /// Undo until the next step back would cross a junction, landing on the
    /// junction's child, or until root.
    pub fn jump_to_previous_intersection_or_start(
        &mut self,
        store: &mut CurveStore,
    ) -> Option<String> {
        let mut affected = None;
        while self.can_undo() {
            affected = self.undo(store);
            let Some(parent) = self.nodes[self.current].parent else {
                break;
            };
            if self.nodes[parent].children.len() > 1 {
                break;
            }
        }
        affected
    }

    /// Rewind to root and drop everything else. The root survives.
    pub fn clear(&mut self, store: &mut CurveStore) {
        while self.can_undo() {
            self.undo(store);
        }
        self.nodes.truncate(1);
        self.nodes[ROOT].children.clear();
        self.current = ROOT;
        self.selected_child = 0;
    }
}

impl Default for HistoryTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    fn add_point(tree: &mut HistoryTree, store: &mut CurveStore, x: f64, y: f64) -> Option<String> {
        let id = store.active_id().unwrap().to_string();
        tree.execute_command(
            Command::AddPoint {
                curve_id: id,
                point: Point::new(x, y),
            },
            store,
        )
    }

    fn points(store: &CurveStore) -> Vec<(f64, f64)> {
        store.active_points().iter().map(|p| (p.x, p.y)).collect()
    }

    #[test]
    fn test_execute_moves_current_and_returns_affected() {
        let mut store = CurveStore::new();
        let mut tree = HistoryTree::new();
        let active = store.active_id().unwrap().to_string();

        let affected = add_point(&mut tree, &mut store, 1.0, 2.0);
        assert_eq!(affected.as_deref(), Some(active.as_str()));
        assert!(tree.can_undo());
        assert!(!tree.can_redo());
    }

    #[test]
    fn test_undo_redo_chain() {
        let mut store = CurveStore::new();
        let mut tree = HistoryTree::new();

        add_point(&mut tree, &mut store, 1.0, 1.0);
        add_point(&mut tree, &mut store, 2.0, 2.0);
        assert_eq!(points(&store), vec![(1.0, 1.0), (2.0, 2.0)]);

        tree.undo(&mut store);
        assert_eq!(points(&store), vec![(1.0, 1.0)]);
        assert!(tree.can_redo());

        tree.redo(&mut store);
        assert_eq!(points(&store), vec![(1.0, 1.0), (2.0, 2.0)]);
    }

    #[test]
    fn test_undo_at_root_is_noop() {
        let mut store = CurveStore::new();
        let mut tree = HistoryTree::new();
        assert!(!tree.can_undo());
        assert_eq!(tree.undo(&mut store), None);
        assert_eq!(tree.current(), 0);
    }

    #[test]
    fn test_branching_preserves_prior_future() {
        let mut store = CurveStore::new();
        let mut tree = HistoryTree::new();

        add_point(&mut tree, &mut store, 10.0, 20.0);
        add_point(&mut tree, &mut store, 30.0, 40.0);
        add_point(&mut tree, &mut store, 50.0, 60.0);

        tree.undo(&mut store);
        tree.undo(&mut store);
        assert_eq!(points(&store), vec![(10.0, 20.0)]);

        add_point(&mut tree, &mut store, 100.0, 100.0);
        assert_eq!(points(&store), vec![(10.0, 20.0), (100.0, 100.0)]);

        let branches = tree.get_branches();
        assert_eq!(branches.len(), 2);
        let current: Vec<_> = branches.iter().filter(|b| b.is_current).collect();
        assert_eq!(current.len(), 1);

        // Switching to the alternative restores the whole abandoned future.
        let other = branches.iter().find(|b| !b.is_current).unwrap().node;
        tree.switch_to_branch(other, &mut store);
        assert_eq!(
            points(&store),
            vec![(10.0, 20.0), (30.0, 40.0), (50.0, 60.0)]
        );
    }

    #[test]
    fn test_intersection_cycling_does_not_mutate_state() {
        let mut store = CurveStore::new();
        let mut tree = HistoryTree::new();

        add_point(&mut tree, &mut store, 10.0, 20.0);
        add_point(&mut tree, &mut store, 30.0, 40.0);
        tree.undo(&mut store);
        add_point(&mut tree, &mut store, 100.0, 100.0);
        tree.undo(&mut store);

        assert!(tree.is_at_intersection());
        let before = points(&store);

        tree.switch_to_next_branch();
        tree.switch_to_next_branch();
        assert_eq!(points(&store), before);

        let info = tree.get_intersection_info().unwrap();
        assert_eq!(info.total_branches, 2);

        // Redo applies whichever child is selected.
        tree.redo(&mut store);
        assert_eq!(points(&store).len(), 2);
    }

    #[test]
    fn test_intersection_info_none_on_straight_line() {
        let mut store = CurveStore::new();
        let mut tree = HistoryTree::new();
        add_point(&mut tree, &mut store, 1.0, 1.0);
        assert!(!tree.is_at_intersection());
        assert_eq!(tree.get_intersection_info(), None);
    }

    #[test]
    fn test_undo_selects_the_branch_it_came_from() {
        let mut store = CurveStore::new();
        let mut tree = HistoryTree::new();

        add_point(&mut tree, &mut store, 1.0, 1.0);
        add_point(&mut tree, &mut store, 2.0, 2.0); // child 0
        tree.undo(&mut store);
        add_point(&mut tree, &mut store, 3.0, 3.0); // child 1
        tree.undo(&mut store);

        // Redo must return to the branch we just left.
        tree.redo(&mut store);
        assert_eq!(points(&store), vec![(1.0, 1.0), (3.0, 3.0)]);
    }

    #[test]
    fn test_jump_to_next_intersection_or_end() {
        let mut store = CurveStore::new();
        let mut tree = HistoryTree::new();

        add_point(&mut tree, &mut store, 1.0, 1.0);
        add_point(&mut tree, &mut store, 2.0, 2.0);
        add_point(&mut tree, &mut store, 3.0, 3.0);
        while tree.can_undo() {
            tree.undo(&mut store);
        }

        tree.jump_to_next_intersection_or_end(&mut store);
        // Straight line: the jump runs to the end.
        assert_eq!(points(&store).len(), 3);
        assert!(!tree.can_redo());
    }

    #[test]
    fn test_jump_stops_at_intersection() {
        let mut store = CurveStore::new();
        let mut tree = HistoryTree::new();

        add_point(&mut tree, &mut store, 1.0, 1.0);
        add_point(&mut tree, &mut store, 2.0, 2.0);
        tree.undo(&mut store);
        add_point(&mut tree, &mut store, 9.0, 9.0);
        // Back to root.
        tree.undo(&mut store);
        tree.undo(&mut store);
        assert_eq!(tree.current(), 0);

        tree.jump_to_next_intersection_or_end(&mut store);
        // Lands on the junction node (two children), one point applied.
        assert!(tree.is_at_intersection());
        assert_eq!(points(&store), vec![(1.0, 1.0)]);
    }

    #[test]
    fn test_jump_to_previous_intersection_or_start() {
        let mut store = CurveStore::new();
        let mut tree = HistoryTree::new();

        add_point(&mut tree, &mut store, 1.0, 1.0);
        add_point(&mut tree, &mut store, 2.0, 2.0);
        tree.undo(&mut store);
        add_point(&mut tree, &mut store, 9.0, 9.0);
        add_point(&mut tree, &mut store, 10.0, 10.0);

        // The jump lands one step short of the junction, on its child.
        tree.jump_to_previous_intersection_or_start(&mut store);
        assert!(!tree.is_at_intersection());
        assert_eq!(points(&store), vec![(1.0, 1.0), (9.0, 9.0)]);
        assert!(tree.can_redo());

        // From the junction's child the next step back crosses the junction;
        // with no earlier junction the jump rewinds to root.
        tree.jump_to_previous_intersection_or_start(&mut store);
        assert_eq!(tree.current(), 0);
        assert!(points(&store).is_empty());
    }

    #[test]
    fn test_clear_rewinds_and_drops_children() {
        let mut store = CurveStore::new();
        let mut tree = HistoryTree::new();

        add_point(&mut tree, &mut store, 1.0, 1.0);
        add_point(&mut tree, &mut store, 2.0, 2.0);
        tree.clear(&mut store);

        assert_eq!(tree.current(), 0);
        assert_eq!(tree.len(), 1);
        assert!(points(&store).is_empty());
        assert!(!tree.can_undo());
        assert!(!tree.can_redo());
    }

    #[test]
    fn test_remote_command_adds_no_node() {
        let mut store = CurveStore::new();
        let tree = HistoryTree::new();
        let cmd = Command::RemoteOverwrite {
            new_curves: store.curves().to_vec(),
        };
        tree.execute_remote_command(&cmd, &mut store);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_command_hook_fires_on_execute_only() {
        use std::sync::{Arc, Mutex};

        let mut store = CurveStore::new();
        let mut tree = HistoryTree::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        tree.set_on_command(Box::new(move |_cmd, desc| {
            sink.lock().unwrap().push(desc.to_string());
        }));

        add_point(&mut tree, &mut store, 1.0, 1.0);
        tree.undo(&mut store);
        tree.redo(&mut store);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], "Add point to blue curve");
    }

    #[test]
    fn test_replay_equivalence() {
        // The observable store equals replaying the root-to-current path
        // against a fresh store.
        let mut store = CurveStore::new();
        let initial = store.clone();
        let mut tree = HistoryTree::new();

        add_point(&mut tree, &mut store, 1.0, 1.0);
        add_point(&mut tree, &mut store, 2.0, 2.0);
        tree.undo(&mut store);
        add_point(&mut tree, &mut store, 3.0, 3.0);
        tree.undo(&mut store);
        tree.redo(&mut store);

        let mut replayed = initial;
        let mut path = Vec::new();
        let mut at = Some(tree.current());
        while let Some(id) = at {
            path.push(id);
            at = tree.node(id).parent;
        }
        for id in path.into_iter().rev() {
            if let Some(cmd) = tree.node(id).command.as_ref() {
                cmd.execute(&mut replayed);
            }
        }
        assert_eq!(replayed.curves(), store.curves());
    }
}
