//! Client-side application of local and remote operations

use tracing::{debug, info, trace, warn};

use crate::board::{Background, Board};
use crate::capture::{DrawPermitFlag, LocalOrigin};
use crate::types::{BoardOp, Envelope, SERVER_USER};
use crate::{CoreError, Result};

/// What a remote envelope did to local state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Echo of a stroke this peer drew; geometry already applied locally
    Echo,
    Stroke,
    Background,
    Permit(bool),
    Ignored,
}

/// Board replica kept by a client
#[derive(Debug)]
pub struct ClientSync {
    user_id: String,
    board: Board,
    background: Background,
    local_origin: LocalOrigin,
    permit: DrawPermitFlag,
    local_seq: u64,
    last_global_seq: Option<u64>,
}

impl ClientSync {
    pub fn new(user_id: impl Into<String>, local_origin: LocalOrigin, permit: DrawPermitFlag) -> Self {
        Self {
            user_id: user_id.into(),
            board: Board::new(),
            background: Background::default(),
            local_origin,
            permit,
            local_seq: 0,
            last_global_seq: None,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn background(&self) -> &Background {
        &self.background
    }

    pub fn permit(&self) -> &DrawPermitFlag {
        &self.permit
    }

    pub fn local_origin(&self) -> &LocalOrigin {
        &self.local_origin
    }

    pub fn last_global_seq(&self) -> Option<u64> {
        self.last_global_seq
    }

    /// Drop all replicated state ahead of a fresh snapshot.
    /// Own strokes still being drawn stay marked as local.
    pub fn reset(&mut self) {
        let board = &self.board;
        self.local_origin.retain(|id| board.open_tool(id).is_some());
        self.board.clear();
        self.background.clear();
        self.last_global_seq = None;
    }

    /// Apply a locally captured op and wrap it for sending
    pub fn apply_local(&mut self, op: &BoardOp) -> Result<Envelope> {
        self.apply_op(op);
        self.local_seq += 1;
        Envelope::pack(self.user_id.as_str(), op, Some(self.local_seq))
    }

    /// Apply an envelope received from the host
    pub fn apply_remote(&mut self, env: &Envelope) -> Result<Applied> {
        if let Some(seq) = env.global_seq {
            match self.last_global_seq {
                Some(last) if seq <= last => {
                    warn!(seq, last, "Global sequence went backwards");
                }
                _ => self.last_global_seq = Some(seq),
            }
        }

        let op = env.op()?;

        // Snapshot replay and host-forced ends come from `server` and always apply
        if let Some(id) = op.stroke_id() {
            if self.local_origin.contains(id) {
                if let BoardOp::StrokeEnd(_) = op {
                    self.local_origin.remove(id);
                }
                if env.user_id != SERVER_USER {
                    trace!(stroke_id = %id, seq = ?env.global_seq, "Own stroke echoed");
                    return Ok(Applied::Echo);
                }
            }
        }

        Ok(match &op {
            BoardOp::Hello(hello) => {
                info!(user = %env.user_id, message = %hello.message, "Peer said hello");
                Applied::Ignored
            }
            BoardOp::DrawPermit(permit) if permit.user_id == self.user_id => {
                info!(allowed = permit.allowed, "Draw permit updated");
                self.permit.set(permit.allowed);
                Applied::Permit(permit.allowed)
            }
            BoardOp::DrawPermit(_) => Applied::Ignored,
            _ => self.apply_op(&op),
        })
    }

    fn apply_op(&mut self, op: &BoardOp) -> Applied {
        match op {
            BoardOp::StrokeStart(_) | BoardOp::StrokeMoveBatch(_) | BoardOp::StrokeEnd(_) => {
                match self.board.apply(op) {
                    Ok(()) => {}
                    Err(CoreError::UnknownStroke(id)) => {
                        debug!(stroke_id = %id, "Batch for unknown stroke")
                    }
                    Err(e) => warn!(error = %e, "Failed to apply stroke op"),
                }
                Applied::Stroke
            }
            BoardOp::BgSet(_) | BoardOp::BgClear | BoardOp::BgGoto(_) => {
                if self.background.apply(op) {
                    debug!(op = %op.msg_type(), "Background updated");
                }
                Applied::Background
            }
            BoardOp::Hello(_) | BoardOp::DrawPermit(_) => Applied::Ignored,
        }
    }
}
