//! Materialized board state
//!
//! Strokes live in an arena ordered by a hierarchical key. A new stroke gets
//! `[n]` from a session counter; the pieces of an erased stroke get the parent
//! key plus their run index, so they sort exactly where the parent was.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::eraser::{self, DEFAULT_ERASER_WIDTH};
use crate::protocol::quant::{dequantize_point, dequantize_width};
use crate::types::{BgSet, BoardOp, NormPoint, Stroke, Tool};
use crate::{CoreError, Result};

type OrderKey = Vec<u64>;

/// Tool and width of a stroke that has started and not yet ended
#[derive(Debug, Clone, Copy, PartialEq)]
struct OpenStroke {
    tool: Tool,
    width: f32,
}

/// Ordered stroke collection
#[derive(Debug, Default)]
pub struct Board {
    strokes: BTreeMap<OrderKey, Stroke>,
    keys: HashMap<String, OrderKey>,
    open: HashMap<String, OpenStroke>,
    next_order: u64,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.keys.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Stroke> {
        self.keys.get(id).and_then(|k| self.strokes.get(k))
    }

    /// Strokes in display order
    pub fn strokes(&self) -> impl Iterator<Item = &Stroke> {
        self.strokes.values()
    }

    /// Tool of an open stroke
    pub fn open_tool(&self, id: &str) -> Option<Tool> {
        self.open.get(id).map(|o| o.tool)
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
        self.keys.clear();
        self.open.clear();
        self.next_order = 0;
    }

    /// Insert a new stroke at the end. Returns false if the id already exists.
    pub fn insert(&mut self, stroke: Stroke) -> bool {
        if self.keys.contains_key(&stroke.id) {
            return false;
        }
        let key = vec![self.next_order];
        self.next_order += 1;
        self.keys.insert(stroke.id.clone(), key.clone());
        self.strokes.insert(key, stroke);
        true
    }

    /// Append points to a stored stroke
    pub fn append(&mut self, id: &str, points: &[NormPoint]) -> Result<()> {
        let stroke = self
            .keys
            .get(id)
            .and_then(|k| self.strokes.get_mut(k))
            .ok_or_else(|| CoreError::UnknownStroke(id.to_string()))?;
        stroke.points.extend_from_slice(points);
        Ok(())
    }

    /// Erase every pen stroke hit by the eraser path. Returns how many strokes were rewritten.
    pub fn apply_eraser(&mut self, eraser_pts: &[NormPoint], eraser_radius: f32) -> usize {
        if eraser_pts.is_empty() || self.strokes.is_empty() {
            return 0;
        }

        let hits: Vec<(OrderKey, Vec<Vec<NormPoint>>)> = self
            .strokes
            .iter()
            .filter(|(_, s)| s.tool == Tool::Pen)
            .filter_map(|(key, s)| {
                eraser::split_stroke(&s.points, s.width, eraser_pts, eraser_radius)
                    .map(|runs| (key.clone(), runs))
            })
            .collect();

        for (key, runs) in &hits {
            let Some(parent) = self.strokes.remove(key) else {
                continue;
            };
            self.keys.remove(&parent.id);

            for (k, run) in runs.iter().enumerate() {
                let id = eraser::segment_id(&parent.id, k);
                let mut child_key = key.clone();
                child_key.push(k as u64);
                self.keys.insert(id.clone(), child_key.clone());
                self.strokes.insert(
                    child_key,
                    Stroke {
                        id,
                        color: parent.color,
                        width: parent.width,
                        tool: parent.tool,
                        points: run.clone(),
                    },
                );
            }
            debug!(stroke_id = %parent.id, pieces = runs.len(), "Stroke erased");
        }

        hits.len()
    }

    /// Apply a stroke operation. Non-stroke operations are ignored.
    pub fn apply(&mut self, op: &BoardOp) -> Result<()> {
        match op {
            BoardOp::StrokeStart(start) => {
                let width = dequantize_width(start.width_q);
                self.open.insert(
                    start.stroke_id.clone(),
                    OpenStroke {
                        tool: start.tool,
                        width,
                    },
                );
                if start.tool == Tool::Pen {
                    self.insert(Stroke::new(&start.stroke_id, start.color, width, Tool::Pen));
                }
                Ok(())
            }
            BoardOp::StrokeMoveBatch(batch) => {
                let points: Vec<NormPoint> =
                    batch.points.iter().copied().map(dequantize_point).collect();
                self.apply_points(&batch.stroke_id, &points)
            }
            BoardOp::StrokeEnd(end) => {
                self.open.remove(&end.stroke_id);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Apply normalized points to an open stroke: append for a pen, erase for an eraser.
    pub fn apply_points(&mut self, id: &str, points: &[NormPoint]) -> Result<()> {
        match self.open.get(id).copied() {
            Some(OpenStroke {
                tool: Tool::Eraser,
                width,
            }) => {
                // A zero width is an unset width, erased with the default
                let width = if width > 0.0 { width } else { DEFAULT_ERASER_WIDTH };
                self.apply_eraser(points, width / 2.0);
                Ok(())
            }
            Some(_) => self.append(id, points),
            None if self.contains(id) => {
                debug!(stroke_id = %id, "Late batch for closed stroke");
                Ok(())
            }
            None => Err(CoreError::UnknownStroke(id.to_string())),
        }
    }
}

/// Single background slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Background {
    current: Option<BgSet>,
}

impl Background {
    pub fn current(&self) -> Option<&BgSet> {
        self.current.as_ref()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    /// Apply a background operation. Returns true if the slot changed.
    pub fn apply(&mut self, op: &BoardOp) -> bool {
        match op {
            BoardOp::BgSet(bg) => {
                self.current = Some(bg.clone());
                true
            }
            BoardOp::BgClear => self.current.take().is_some(),
            BoardOp::BgGoto(goto) => match self.current.as_mut() {
                Some(bg) if bg.page != goto.page => {
                    bg.page = goto.page;
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
}
