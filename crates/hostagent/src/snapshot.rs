//! Snapshot replay for newly joined peers
//!
//! The host keeps every stroke as it arrived on the wire: the original
//! `StrokeStart`, the quantized points in arrival order, and whether the stroke
//! has ended. A joiner receives the cached background first, then each stroke
//! in creation order.

use std::collections::HashMap;

use classboard_core::types::{BgSet, StrokeEnd, StrokeMoveBatch, StrokeStart};
use classboard_core::{BoardOp, Envelope, QPoint, Result};

/// Points per replayed move batch
pub const SNAPSHOT_CHUNK: usize = 64;

/// Stroke as stored by the host
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeBuilder {
    pub start: StrokeStart,
    pub points: Vec<QPoint>,
    pub ended: bool,
    /// Creation order, the tie-break for replay
    pub order: u64,
}

impl StrokeBuilder {
    pub fn new(start: StrokeStart, order: u64) -> Self {
        Self {
            start,
            points: Vec::new(),
            ended: false,
            order,
        }
    }
}

/// Build the replay sequence. Every envelope is attributed to `server` and carries no global sequence.
pub fn build_snapshot(
    background: Option<&BgSet>,
    builders: &HashMap<String, StrokeBuilder>,
    chunk_size: usize,
) -> Result<Vec<Envelope>> {
    let chunk_size = chunk_size.max(1);
    let mut out = Vec::new();

    if let Some(bg) = background {
        out.push(Envelope::from_server(&BoardOp::BgSet(bg.clone()))?);
    }

    let mut items: Vec<&StrokeBuilder> = builders.values().collect();
    items.sort_by_key(|b| b.order);

    for b in items {
        let stroke_id = &b.start.stroke_id;
        out.push(Envelope::from_server(&BoardOp::StrokeStart(b.start.clone()))?);
        for chunk in b.points.chunks(chunk_size) {
            out.push(Envelope::from_server(&BoardOp::StrokeMoveBatch(StrokeMoveBatch {
                stroke_id: stroke_id.clone(),
                points: chunk.to_vec(),
            }))?);
        }
        if b.ended {
            out.push(Envelope::from_server(&BoardOp::StrokeEnd(StrokeEnd {
                stroke_id: stroke_id.clone(),
            }))?);
        }
    }

    Ok(out)
}
