//! Bounded inbound queue feeding the dispatcher
//!
//! When full, the oldest queued move batch is shed to make room. Control
//! events (starts, ends, background, joins, console commands) are never
//! dropped, so the queue may exceed its capacity while holding only those.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use classboard_core::{BoardOp, Envelope, MsgType};
use tokio::sync::{broadcast, oneshot, Notify};
use tracing::debug;

use crate::authority::{ConnId, SessionState};

/// Sent to a joiner: its snapshot frames and a receiver subscribed at the same instant
#[derive(Debug)]
pub struct JoinReply {
    pub snapshot: Vec<bytes::Bytes>,
    pub updates: broadcast::Receiver<bytes::Bytes>,
}

/// Point-in-time view of the session for the console
#[derive(Debug, Clone, PartialEq)]
pub struct HostStatus {
    pub state: SessionState,
    pub participants: Vec<String>,
    pub strokes: usize,
    pub last_seq: u64,
    pub background_page: Option<i32>,
    pub dropped_batches: u64,
}

/// Everything the dispatcher reacts to
#[derive(Debug)]
pub enum HostEvent {
    Frame { conn: ConnId, env: Envelope },
    /// Background op from a legacy JSON text frame
    Legacy { conn: ConnId, op: BoardOp },
    /// `None` in the reply means the session is stopped
    Join {
        conn: ConnId,
        reply: oneshot::Sender<Option<JoinReply>>,
    },
    Leave { conn: ConnId },
    Publish {
        op: BoardOp,
        reply: Option<oneshot::Sender<classboard_core::Result<u64>>>,
    },
    Start,
    Stop,
    Status { reply: oneshot::Sender<HostStatus> },
}

impl HostEvent {
    fn is_droppable(&self) -> bool {
        matches!(self, HostEvent::Frame { env, .. } if env.msg_type == MsgType::StrokeMoveBatch.as_str())
    }
}

#[derive(Debug)]
pub struct InboundQueue {
    items: Mutex<VecDeque<HostEvent>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue without waiting. Returns false if an event was shed.
    pub fn push(&self, event: HostEvent) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        let mut kept = true;
        {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            if items.len() >= self.capacity {
                match items.iter().position(HostEvent::is_droppable) {
                    Some(idx) => {
                        items.remove(idx);
                        kept = false;
                    }
                    None if event.is_droppable() => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!("Inbound queue full of control events, shedding move batch");
                        return false;
                    }
                    None => {}
                }
            }
            items.push_back(event);
        }

        if !kept {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Inbound queue full, dropped oldest move batch");
        }
        self.notify.notify_one();
        kept
    }

    /// Wait for the next event. Returns `None` once closed and drained.
    pub async fn pop(&self) -> Option<HostEvent> {
        loop {
            let notified = self.notify.notified();
            if let Some(event) = self.try_pop() {
                return Some(event);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    pub fn try_pop(&self) -> Option<HostEvent> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move batches shed so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
