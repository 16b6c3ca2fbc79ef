//! The state coordinator: glue between input, history, replica, and
//! renderer.
//!
//! Every observable engine event routes through here. Local edits become
//! commands executed on the local tree and mirrored into the replica;
//! undo/redo pick the shared history path when a session is live and the
//! local tree otherwise; remote changes come back as whole-state overwrites
//! that bypass the local tree. A reentrancy flag drops local-command
//! callbacks fired while a remote change is being applied, so echoes never
//! loop.
//!
//! The coordinator itself is synchronous; the session driver drains its
//! outbox into the websocket client and feeds [`SessionEvent`]s back in.

use std::sync::{Arc, Mutex};

use curveboard_collab::{
    PresencePayload, RemoteDelta, Replica, SessionEvent, SharedHistoryTree, User,
};
use curveboard_core::{Command, Curve, CurveStore, HistoryTree, Point, StoreError};

use crate::config::SessionConfig;
use crate::input::{InputSource, PointAction};
use crate::render::{RenderFrame, Renderer, VisualizationMode};

/// A message the session driver should hand to the transport.
#[derive(Debug, Clone)]
pub enum Outbound {
    Change(Vec<u8>),
    Presence(PresencePayload),
}

type PendingCommands = Arc<Mutex<Vec<(Command, String)>>>;

/// The coordinator. Owns the store, both histories, and the replica.
pub struct Coordinator<I: InputSource, R: Renderer> {
    store: CurveStore,
    history: HistoryTree,
    replica: Replica,
    input: I,
    renderer: R,
    config: SessionConfig,
    connected: bool,
    applying_remote_change: bool,
    cursor: Option<Point>,
    remote_users: Vec<User>,
    shared_history_view: Option<SharedHistoryTree>,
    pending: PendingCommands,
    outbox: Vec<Outbound>,
}

impl<I: InputSource, R: Renderer> Coordinator<I, R> {
    pub fn new(input: I, renderer: R, config: SessionConfig) -> Self {
        let pending: PendingCommands = Arc::new(Mutex::new(Vec::new()));
        let mut history = HistoryTree::new();
        let sink = pending.clone();
        history.set_on_command(Box::new(move |cmd, description| {
            if let Ok(mut queue) = sink.lock() {
                queue.push((cmd.clone(), description.to_string()));
            }
        }));

        let mut coordinator = Self {
            store: CurveStore::new(),
            history,
            replica: Replica::new(config.user_name.clone()),
            input,
            renderer,
            config,
            connected: false,
            applying_remote_change: false,
            cursor: None,
            remote_users: Vec::new(),
            shared_history_view: None,
            pending,
            outbox: Vec::new(),
        };
        coordinator.render();
        coordinator
    }

    // ── accessors ───────────────────────────────────────────────────

    pub fn store(&self) -> &CurveStore {
        &self.store
    }

    pub fn history(&self) -> &HistoryTree {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistoryTree {
        &mut self.history
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn input(&self) -> &I {
        &self.input
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Collaborators' presence records, as last reported by the replica.
    pub fn remote_users(&self) -> &[User] {
        &self.remote_users
    }

    /// The shared history tree, as last reported by the replica.
    pub fn shared_history_view(&self) -> Option<&SharedHistoryTree> {
        self.shared_history_view.as_ref()
    }

    /// Toggle collaboration at runtime.
    pub fn set_collaboration_enabled(&mut self, enabled: bool) {
        self.config.collaboration_enabled = enabled;
    }

    /// Shared history is authoritative only while a session is live.
    fn collaboration_active(&self) -> bool {
        self.config.collaboration_enabled && self.connected
    }

    /// Messages waiting for the transport.
    pub fn take_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    // ── local edits ─────────────────────────────────────────────────

    /// Ingest one edit gesture from the input source.
    pub fn handle_point_action(&mut self, action: PointAction) {
        if self.applying_remote_change {
            // Echo of a remote apply; never re-enters history.
            return;
        }
        self.store.reconcile_active();
        let Some(curve_id) = self.store.active_id().map(str::to_string) else {
            return;
        };

        let cmd = match action {
            PointAction::Add { point } => {
                self.cursor = Some(point);
                Command::AddPoint { curve_id, point }
            }
            PointAction::Remove { point, index } => {
                self.cursor = Some(point);
                Command::RemovePoint {
                    curve_id,
                    index,
                    point,
                }
            }
            PointAction::Move {
                point,
                index,
                old_point,
            } => {
                self.cursor = Some(point);
                Command::MovePoint {
                    curve_id,
                    index,
                    old_point,
                    new_point: point,
                }
            }
        };

        let affected = self.history.execute_command(cmd, &mut self.store);
        self.flush_pending_commands();
        self.sync_active(affected);
        self.input.set_points(self.store.active_points());
        if self.config.collaboration_enabled {
            self.push_presence();
        }
        self.render();
    }

    /// Load a document file into the store, as an undoable command.
    pub fn load_document(&mut self, json: &str) -> Result<(), StoreError> {
        let mut probe = CurveStore::empty();
        probe.from_json(json)?;

        let cmd = Command::LoadCurves {
            new_curves: probe.curves().to_vec(),
            old_curves: self.store.curves().to_vec(),
            old_active_id: self.store.active_id().map(str::to_string),
        };
        let affected = self.history.execute_command(cmd, &mut self.store);
        self.flush_pending_commands();
        self.after_history_move(affected);
        Ok(())
    }

    /// Drain commands the history hook collected and mirror them into the
    /// replica. Dropped entirely when collaboration is off.
    fn flush_pending_commands(&mut self) {
        let drained: Vec<(Command, String)> = match self.pending.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(_) => return,
        };
        if !self.config.collaboration_enabled {
            return;
        }
        for (cmd, description) in drained {
            if let Some(blob) = self.replica.commit_command(&cmd, &description) {
                self.outbox.push(Outbound::Change(blob));
            }
        }
    }

    // ── undo / redo ─────────────────────────────────────────────────

    pub fn can_undo(&self) -> bool {
        if self.collaboration_active() {
            self.replica.can_shared_undo()
        } else {
            self.history.can_undo()
        }
    }

    pub fn can_redo(&self) -> bool {
        if self.collaboration_active() {
            self.replica.can_shared_redo()
        } else {
            self.history.can_redo()
        }
    }

    pub fn undo(&mut self) {
        if self.collaboration_active() {
            if let Some((blob, curves)) = self.replica.shared_undo() {
                self.outbox.push(Outbound::Change(blob));
                self.overwrite_from_remote(curves);
            }
        } else {
            let affected = self.history.undo(&mut self.store);
            self.after_history_move(affected);
        }
    }

    pub fn redo(&mut self) {
        if self.collaboration_active() {
            if let Some((blob, curves)) = self.replica.shared_redo() {
                self.outbox.push(Outbound::Change(blob));
                self.overwrite_from_remote(curves);
            }
        } else {
            let affected = self.history.redo(&mut self.store);
            self.after_history_move(affected);
        }
    }

    fn after_history_move(&mut self, affected: Option<String>) {
        self.sync_active(affected);
        self.input.set_points(self.store.active_points());
        self.render();
    }

    fn sync_active(&mut self, affected: Option<String>) {
        match affected {
            Some(id) => {
                self.store.set_active(&id);
                self.store.reconcile_active();
            }
            None => self.store.reconcile_active(),
        }
    }

    // ── session events ──────────────────────────────────────────────

    /// Ingest one transport event from the session client.
    pub fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                self.connected = true;
            }
            SessionEvent::Disconnected => {
                self.connected = false;
            }
            SessionEvent::StateSynced {
                session_id,
                document_state,
                is_first_user,
            } => {
                log::info!("synced session {session_id:?} (first user: {is_first_user})");
                self.handle_state_synced(&document_state, is_first_user);
            }
            SessionEvent::RemoteChange { sender_id, changes } => {
                log::debug!("remote change from {sender_id}: {} bytes", changes.len());
                match self.replica.apply_remote_changes(&changes) {
                    Ok(delta) => self.ingest_delta(delta),
                    Err(e) => {
                        // Malformed blobs are dropped; the session goes on.
                        log::warn!("dropping remote change: {e}");
                    }
                }
            }
            SessionEvent::RemotePresence {
                sender_id,
                presence,
            } => {
                self.apply_remote_presence(&sender_id, presence);
            }
        }
    }

    /// The hub's document always loads before anything else. The first
    /// joiner then replays its local store into the shared document as one
    /// load transaction; later joiners re-broadcast their full state so
    /// edits made offline merge in.
    fn handle_state_synced(&mut self, document_state: &[u8], is_first_user: bool) {
        match self.replica.load(document_state, is_first_user) {
            Ok(delta) => {
                if is_first_user {
                    let cmd = Command::LoadCurves {
                        new_curves: self.store.curves().to_vec(),
                        old_curves: Vec::new(),
                        old_active_id: None,
                    };
                    let description = cmd.description(&self.store);
                    if let Some(blob) = self.replica.commit_command(&cmd, &description) {
                        self.outbox.push(Outbound::Change(blob));
                    }
                } else {
                    if let Some(delta) = delta {
                        self.ingest_delta(delta);
                    }
                    self.outbox.push(Outbound::Change(self.replica.save()));
                }
                self.push_presence();
            }
            Err(e) => log::warn!("discarding unloadable session state: {e}"),
        }
    }

    fn ingest_delta(&mut self, delta: RemoteDelta) {
        if let Some(curves) = delta.curves {
            self.overwrite_from_remote(curves);
        }
        if let Some(users) = delta.users {
            let own = self.replica.user_id().to_string();
            self.remote_users = users.into_iter().filter(|u| u.id != own).collect();
        }
        if let Some(history) = delta.history {
            self.shared_history_view = Some(history);
        }
    }

    /// Splice remote curve state into the store, outside the local tree.
    fn overwrite_from_remote(&mut self, curves: Vec<Curve>) {
        self.applying_remote_change = true;
        let cmd = Command::RemoteOverwrite { new_curves: curves };
        self.history.execute_remote_command(&cmd, &mut self.store);
        // The previous active curve may be gone; fall back to the first.
        self.store.reconcile_active();
        self.input.set_points(self.store.active_points());
        self.applying_remote_change = false;
        self.render();
    }

    fn apply_remote_presence(&mut self, sender_id: &str, presence: PresencePayload) {
        match presence {
            PresencePayload::Cursor {
                user_id,
                cursor,
                active_curve_id,
            } => {
                if let Some(user) = self.remote_users.iter_mut().find(|u| u.id == user_id) {
                    user.cursor = cursor;
                    user.active_curve_id = active_curve_id;
                }
            }
            PresencePayload::Join { user, .. } => {
                if user.id != self.replica.user_id()
                    && !self.remote_users.iter().any(|u| u.id == user.id)
                {
                    self.remote_users.push(user);
                }
            }
            PresencePayload::Leave { user_id } => {
                self.remote_users.retain(|u| u.id != user_id);
            }
        }
        log::trace!("presence from {sender_id}");
        self.render();
    }

    /// Upsert our presence in the replica and queue both the CRDT delta and
    /// the lightweight presence frame.
    fn push_presence(&mut self) {
        let active = self.store.active_id().map(str::to_string);
        let name = self.config.user_name.clone();
        if let Some(blob) = self
            .replica
            .update_presence(self.cursor, active.clone(), &name)
        {
            self.outbox.push(Outbound::Change(blob));
        }
        self.outbox.push(Outbound::Presence(PresencePayload::Cursor {
            user_id: self.replica.user_id().to_string(),
            cursor: self.cursor,
            active_curve_id: active,
        }));
    }

    fn render(&mut self) {
        let frame = RenderFrame {
            curves: self.store.curves().to_vec(),
            active_curve_id: self.store.active_id().map(str::to_string),
            animated_points: Vec::new(),
            visualization_mode: VisualizationMode::default(),
            animation_progress: 0.0,
        };
        self.renderer.render(&frame);
    }
}
