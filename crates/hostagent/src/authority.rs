//! Host authority: the single source of truth for a board session
//!
//! Owned by one dispatcher task. Every accepted operation gets the next
//! global sequence number, updates the stored strokes and background, and is
//! handed back stamped for broadcast.

use std::collections::HashMap;

use classboard_core::types::{BgSet, StrokeEnd};
use classboard_core::{Background, Board, BoardOp, CoreError, Envelope, Result};
use tracing::{debug, info, warn};

use crate::snapshot::{build_snapshot, StrokeBuilder, SNAPSHOT_CHUNK};

/// Connection identifier assigned by the server
pub type ConnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Running,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Stopped => f.write_str("stopped"),
            SessionState::Running => f.write_str("running"),
        }
    }
}

#[derive(Debug)]
pub struct HostAuthority {
    state: SessionState,
    seq: u64,
    order_seq: u64,
    builders: HashMap<String, StrokeBuilder>,
    background: Background,
    participants: HashMap<ConnId, String>,
    /// Connection that started each still-open stroke
    open_owner: HashMap<String, ConnId>,
    board: Board,
    snapshot_chunk: usize,
}

impl Default for HostAuthority {
    fn default() -> Self {
        Self::new(SNAPSHOT_CHUNK)
    }
}

impl HostAuthority {
    pub fn new(snapshot_chunk: usize) -> Self {
        Self {
            state: SessionState::Stopped,
            seq: 0,
            order_seq: 0,
            builders: HashMap::new(),
            background: Background::default(),
            participants: HashMap::new(),
            open_owner: HashMap::new(),
            board: Board::new(),
            snapshot_chunk,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Last assigned global sequence number (0 before the first)
    pub fn last_seq(&self) -> u64 {
        self.seq
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn background(&self) -> Option<&BgSet> {
        self.background.current()
    }

    pub fn stroke_count(&self) -> usize {
        self.builders.len()
    }

    /// Participant user ids, sorted
    pub fn participants(&self) -> Vec<String> {
        let mut users: Vec<String> = self.participants.values().cloned().collect();
        users.sort();
        users.dedup();
        users
    }

    /// Returns false if already running
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        self.state = SessionState::Running;
        info!("Session started");
        true
    }

    /// Stop and forget everything
    pub fn stop(&mut self) {
        self.state = SessionState::Stopped;
        self.seq = 0;
        self.order_seq = 0;
        self.builders.clear();
        self.background.clear();
        self.participants.clear();
        self.open_owner.clear();
        self.board.clear();
        info!("Session stopped, board cleared");
    }

    /// Accept an inbound envelope. Returns the stamped envelope to broadcast,
    /// or `None` if it was dropped.
    pub fn accept(&mut self, env: Envelope, conn: Option<ConnId>) -> Option<Envelope> {
        if !self.is_running() {
            debug!(msg_type = %env.msg_type, "Session stopped, dropping frame");
            return None;
        }

        let op = match env.op() {
            Ok(op) => op,
            Err(e) => {
                warn!(msg_type = %env.msg_type, user = %env.user_id, error = %e, "Dropping undecodable frame");
                return None;
            }
        };

        self.seq += 1;
        let seq = self.seq;
        self.apply(&op, &env.user_id, conn);
        debug!(seq, msg_type = %env.msg_type, user = %env.user_id, "Confirmed");
        Some(env.confirmed(seq))
    }

    /// Publish a host-originated operation attributed to `server`
    pub fn publish(&mut self, op: &BoardOp) -> Result<Envelope> {
        if !self.is_running() {
            return Err(CoreError::InvalidState("session is stopped".into()));
        }
        let env = Envelope::from_server(op)?;
        self.accept(env, None)
            .ok_or_else(|| CoreError::InvalidState("operation rejected".into()))
    }

    /// Snapshot envelopes for a new joiner
    pub fn snapshot(&self) -> Result<Vec<Envelope>> {
        build_snapshot(self.background.current(), &self.builders, self.snapshot_chunk)
    }

    /// Forget a closed connection. Returns its user id if it had said hello.
    pub fn remove_connection(&mut self, conn: ConnId) -> Option<String> {
        self.participants.remove(&conn)
    }

    /// End every stroke a departed connection left open, as `server`.
    /// Returns the stamped `StrokeEnd`s to broadcast.
    pub fn end_open_strokes(&mut self, conn: ConnId) -> Vec<Envelope> {
        let mut orphans: Vec<String> = self
            .open_owner
            .iter()
            .filter(|(_, owner)| **owner == conn)
            .map(|(id, _)| id.clone())
            .collect();
        orphans.sort();

        let mut ended = Vec::with_capacity(orphans.len());
        for stroke_id in orphans {
            self.open_owner.remove(&stroke_id);
            match self.publish(&BoardOp::StrokeEnd(StrokeEnd { stroke_id })) {
                Ok(env) => ended.push(env),
                Err(e) => debug!(conn, error = %e, "Could not end orphaned stroke"),
            }
        }
        ended
    }

    fn apply(&mut self, op: &BoardOp, user_id: &str, conn: Option<ConnId>) {
        match op {
            BoardOp::StrokeStart(start) => {
                if let Some(conn) = conn {
                    self.open_owner.insert(start.stroke_id.clone(), conn);
                }
                if !self.builders.contains_key(&start.stroke_id) {
                    self.order_seq += 1;
                    self.builders.insert(
                        start.stroke_id.clone(),
                        StrokeBuilder::new(start.clone(), self.order_seq),
                    );
                }
            }
            BoardOp::StrokeMoveBatch(batch) => match self.builders.get_mut(&batch.stroke_id) {
                Some(b) if b.ended => debug!(stroke_id = %batch.stroke_id, "Late batch for ended stroke"),
                Some(b) => b.points.extend_from_slice(&batch.points),
                None => debug!(stroke_id = %batch.stroke_id, "Batch for unknown stroke"),
            },
            BoardOp::StrokeEnd(end) => {
                if let Some(b) = self.builders.get_mut(&end.stroke_id) {
                    b.ended = true;
                }
                self.open_owner.remove(&end.stroke_id);
            }
            BoardOp::Hello(_) => {
                if let Some(conn) = conn {
                    self.participants.insert(conn, user_id.to_string());
                }
                info!(user = %user_id, participants = self.participants.len(), "Participant joined");
            }
            BoardOp::BgSet(_) | BoardOp::BgClear | BoardOp::BgGoto(_) => {
                if self.background.apply(op) {
                    debug!(op = %op.msg_type(), "Background cached");
                }
            }
            BoardOp::DrawPermit(permit) => {
                info!(user = %permit.user_id, allowed = permit.allowed, "Draw permit");
            }
        }

        match self.board.apply(op) {
            Ok(()) => {}
            Err(CoreError::UnknownStroke(_)) => {}
            Err(e) => warn!(error = %e, "Host board rejected op"),
        }
    }
}
