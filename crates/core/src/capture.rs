//! Stroke capture with adaptive point coalescing
//!
//! Turns a stream of gesture samples into `StrokeStart`, `StrokeMoveBatch`
//! and `StrokeEnd` operations. Points are buffered and flushed as a batch when
//! the batch reaches its target size, when the flush interval elapses, or
//! when the pointer has travelled far enough. A tool or width change in the
//! middle of a gesture ends the current stroke and starts a new one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::protocol::quant::{quantize_point, quantize_width};
use crate::types::{BoardOp, NormPoint, StrokeEnd, StrokeMoveBatch, StrokeStart, Tool};

/// Coalescing thresholds
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Batch size while moving slowly
    pub slow_count: usize,
    /// Batch size while moving fast
    pub fast_count: usize,
    /// Flush at least this often
    pub max_interval: Duration,
    /// A segment longer than `fast_segment` within this window counts as fast
    pub fast_interval: Duration,
    pub fast_segment: f32,
    /// Flush once the accumulated path length reaches this distance
    pub distance_flush: f32,
    /// Width changes smaller than this do not split the stroke
    pub width_epsilon: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            slow_count: 14,
            fast_count: 8,
            max_interval: Duration::from_millis(16),
            fast_interval: Duration::from_millis(12),
            fast_segment: 0.01,
            distance_flush: 0.06,
            width_epsilon: 1e-4,
        }
    }
}

/// Outbound sink for captured operations. Must not block.
pub trait OpSink {
    fn emit(&mut self, op: BoardOp);
}

impl OpSink for Vec<BoardOp> {
    fn emit(&mut self, op: BoardOp) {
        self.push(op);
    }
}

impl OpSink for mpsc::UnboundedSender<BoardOp> {
    fn emit(&mut self, op: BoardOp) {
        if self.send(op).is_err() {
            debug!("Op sink closed, dropping captured op");
        }
    }
}

/// Stroke ids this peer originated, shared between capture and sync
#[derive(Debug, Clone, Default)]
pub struct LocalOrigin(Arc<Mutex<HashSet<String>>>);

impl LocalOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &str) {
        if let Ok(mut set) = self.0.lock() {
            set.insert(id.to_string());
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.lock().map(|set| set.contains(id)).unwrap_or(false)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.0.lock().map(|mut set| set.remove(id)).unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut set) = self.0.lock() {
            set.clear();
        }
    }

    pub fn retain(&self, keep: impl FnMut(&String) -> bool) {
        if let Ok(mut set) = self.0.lock() {
            set.retain(keep);
        }
    }

    pub fn len(&self) -> usize {
        self.0.lock().map(|set| set.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Advisory draw permit, granted by default
#[derive(Debug, Clone)]
pub struct DrawPermitFlag(Arc<AtomicBool>);

impl Default for DrawPermitFlag {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl DrawPermitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, allowed: bool) {
        self.0.store(allowed, Ordering::Relaxed);
    }

    pub fn allowed(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct Gesture {
    stroke_id: String,
    tool: Tool,
    width: f32,
    color: i64,
    batch: Vec<NormPoint>,
    last_pt: NormPoint,
    last_flush: Instant,
    dist_acc: f32,
}

/// Capture state machine: idle, or capturing one stroke of a gesture
pub struct StrokeCapture<S: OpSink> {
    config: CaptureConfig,
    sink: S,
    local_origin: LocalOrigin,
    permit: DrawPermitFlag,
    gesture: Option<Gesture>,
}

impl<S: OpSink> StrokeCapture<S> {
    pub fn new(sink: S, local_origin: LocalOrigin, permit: DrawPermitFlag) -> Self {
        Self::with_config(CaptureConfig::default(), sink, local_origin, permit)
    }

    pub fn with_config(
        config: CaptureConfig,
        sink: S,
        local_origin: LocalOrigin,
        permit: DrawPermitFlag,
    ) -> Self {
        Self {
            config,
            sink,
            local_origin,
            permit,
            gesture: None,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.gesture.is_some()
    }

    /// Id of the stroke currently being captured
    pub fn current_stroke(&self) -> Option<&str> {
        self.gesture.as_ref().map(|g| g.stroke_id.as_str())
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Pointer down. Returns the new stroke id, or `None` without a draw permit.
    pub fn begin(
        &mut self,
        point: NormPoint,
        tool: Tool,
        width: f32,
        color: i64,
        now: Instant,
    ) -> Option<String> {
        if self.gesture.is_some() {
            self.end();
        }
        if !self.permit.allowed() {
            debug!("Draw permit revoked, ignoring gesture");
            return None;
        }

        let stroke_id = Uuid::new_v4().to_string();
        self.open_stroke(stroke_id.clone(), point, tool, width, color, now);
        Some(stroke_id)
    }

    /// Pointer move with the tool and width currently selected
    pub fn sample(&mut self, point: NormPoint, tool: Tool, width: f32, now: Instant) {
        let Some(g) = self.gesture.as_ref() else {
            return;
        };

        let tool_changed = g.tool != tool;
        let width_changed = (g.width - width).abs() >= self.config.width_epsilon;
        if tool_changed || width_changed {
            let (color, last_pt) = (g.color, g.last_pt);
            self.finish_stroke();
            trace!(tool = tool.as_str(), width, "Splitting stroke mid-gesture");
            self.open_stroke(Uuid::new_v4().to_string(), last_pt, tool, width, color, now);
        }

        let Some(g) = self.gesture.as_mut() else {
            return;
        };

        let seg = g.last_pt.dist(&point);
        g.dist_acc += seg;
        g.last_pt = point;
        g.batch.push(point);

        let elapsed = now.saturating_duration_since(g.last_flush);
        let fast = (seg > self.config.fast_segment && elapsed < self.config.fast_interval)
            || g.dist_acc > self.config.distance_flush;
        let target = if fast {
            self.config.fast_count
        } else {
            self.config.slow_count
        };

        if g.batch.len() >= target
            || elapsed >= self.config.max_interval
            || g.dist_acc >= self.config.distance_flush
        {
            g.last_flush = now;
            g.dist_acc = 0.0;
            self.flush();
        }
    }

    /// Pointer up: flush what is pending, then close the stroke.
    pub fn end(&mut self) {
        self.finish_stroke();
    }

    /// Gesture cancelled. Same wire effect as [`end`](Self::end).
    pub fn cancel(&mut self) {
        self.finish_stroke();
    }

    fn open_stroke(
        &mut self,
        stroke_id: String,
        point: NormPoint,
        tool: Tool,
        width: f32,
        color: i64,
        now: Instant,
    ) {
        self.local_origin.insert(&stroke_id);
        self.sink.emit(BoardOp::StrokeStart(StrokeStart {
            stroke_id: stroke_id.clone(),
            color,
            width_q: quantize_width(width),
            tool,
        }));
        // Two copies of the down point so a tap renders and an eraser bites without movement
        let q = quantize_point(point);
        self.sink.emit(BoardOp::StrokeMoveBatch(StrokeMoveBatch {
            stroke_id: stroke_id.clone(),
            points: vec![q, q],
        }));

        self.gesture = Some(Gesture {
            stroke_id,
            tool,
            width,
            color,
            batch: Vec::with_capacity(self.config.slow_count),
            last_pt: point,
            last_flush: now,
            dist_acc: 0.0,
        });
    }

    fn flush(&mut self) {
        let Some(g) = self.gesture.as_mut() else {
            return;
        };
        if g.batch.is_empty() {
            return;
        }
        let points = g.batch.drain(..).map(quantize_point).collect();
        let stroke_id = g.stroke_id.clone();
        self.sink
            .emit(BoardOp::StrokeMoveBatch(StrokeMoveBatch { stroke_id, points }));
    }

    fn finish_stroke(&mut self) {
        self.flush();
        if let Some(g) = self.gesture.take() {
            self.sink.emit(BoardOp::StrokeEnd(StrokeEnd {
                stroke_id: g.stroke_id,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture() -> StrokeCapture<Vec<BoardOp>> {
        StrokeCapture::new(Vec::new(), LocalOrigin::new(), DrawPermitFlag::new())
    }

    fn batches(ops: &[BoardOp]) -> Vec<usize> {
        ops.iter()
            .filter_map(|op| match op {
                BoardOp::StrokeMoveBatch(b) => Some(b.points.len()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_begin_emits_start_and_dot() {
        let mut cap = capture();
        let t0 = Instant::now();
        let id = cap.begin(NormPoint::new(0.5, 0.5), Tool::Pen, 0.01, 0xFF000000, t0).unwrap();

        let ops = cap.sink();
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], BoardOp::StrokeStart(s) if s.stroke_id == id && s.width_q == 10));
        match &ops[1] {
            BoardOp::StrokeMoveBatch(b) => {
                assert_eq!(b.points.len(), 2);
                assert_eq!(b.points[0], b.points[1]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(cap.local_origin.contains(&id));
    }

    #[test]
    fn test_slow_motion_flushes_at_fourteen() {
        let mut cap = capture();
        let t0 = Instant::now();
        cap.begin(NormPoint::new(0.5, 0.5), Tool::Pen, 0.01, 0, t0);

        // tiny steps, 1ms apart: neither fast nor far nor late
        for i in 1..=14 {
            let p = NormPoint::new(0.5 + i as f32 * 0.0001, 0.5);
            cap.sample(p, Tool::Pen, 0.01, t0 + Duration::from_millis(i));
        }
        assert_eq!(batches(cap.sink()), vec![2, 14]);
    }

    #[test]
    fn test_fast_motion_flushes_at_eight() {
        let mut cap = capture();
        let t0 = Instant::now();
        cap.begin(NormPoint::new(0.1, 0.1), Tool::Pen, 0.01, 0, t0);

        // 0.011 per sample within 1ms is fast; distance flush disabled to isolate the count
        let cfg = CaptureConfig {
            distance_flush: 1.0,
            ..CaptureConfig::default()
        };
        cap.config = cfg;
        for i in 1..=8 {
            let p = NormPoint::new(0.1 + i as f32 * 0.011, 0.1);
            cap.sample(p, Tool::Pen, 0.01, t0 + Duration::from_micros(i * 100));
        }
        assert_eq!(batches(cap.sink()), vec![2, 8]);
    }

    #[test]
    fn test_time_ceiling_flushes() {
        let mut cap = capture();
        let t0 = Instant::now();
        cap.begin(NormPoint::new(0.5, 0.5), Tool::Pen, 0.01, 0, t0);
        cap.sample(NormPoint::new(0.5, 0.5), Tool::Pen, 0.01, t0 + Duration::from_millis(5));
        assert_eq!(batches(cap.sink()), vec![2]);
        cap.sample(NormPoint::new(0.5, 0.5), Tool::Pen, 0.01, t0 + Duration::from_millis(16));
        assert_eq!(batches(cap.sink()), vec![2, 2]);
    }

    #[test]
    fn test_distance_flushes() {
        let mut cap = capture();
        let t0 = Instant::now();
        cap.begin(NormPoint::new(0.1, 0.1), Tool::Pen, 0.01, 0, t0);
        cap.sample(NormPoint::new(0.2, 0.1), Tool::Pen, 0.01, t0 + Duration::from_millis(1));
        assert_eq!(batches(cap.sink()), vec![2, 1]);
    }

    #[test]
    fn test_end_flushes_then_closes() {
        let mut cap = capture();
        let t0 = Instant::now();
        let id = cap.begin(NormPoint::new(0.5, 0.5), Tool::Pen, 0.01, 0, t0).unwrap();
        cap.sample(NormPoint::new(0.5001, 0.5), Tool::Pen, 0.01, t0 + Duration::from_millis(1));
        cap.end();

        let ops = cap.sink();
        assert_eq!(batches(ops), vec![2, 1]);
        assert!(matches!(ops.last(), Some(BoardOp::StrokeEnd(e)) if e.stroke_id == id));
        assert!(!cap.is_capturing());
    }

    #[test]
    fn test_tool_change_splits() {
        let mut cap = capture();
        let t0 = Instant::now();
        let first = cap.begin(NormPoint::new(0.5, 0.5), Tool::Pen, 0.01, 7, t0).unwrap();
        cap.sample(NormPoint::new(0.5001, 0.5), Tool::Pen, 0.01, t0 + Duration::from_millis(1));
        cap.sample(NormPoint::new(0.5002, 0.5), Tool::Eraser, 0.04, t0 + Duration::from_millis(2));
        cap.end();

        assert!(cap.current_stroke().is_none());

        let kinds: Vec<&str> = cap
            .sink()
            .iter()
            .map(|op| op.msg_type().as_str())
            .collect();
        assert_eq!(
            kinds,
            vec![
                "StrokeStart",
                "StrokeMoveBatch",
                "StrokeMoveBatch",
                "StrokeEnd",
                "StrokeStart",
                "StrokeMoveBatch",
                "StrokeMoveBatch",
                "StrokeEnd",
            ]
        );

        match &cap.sink()[4] {
            BoardOp::StrokeStart(s) => {
                assert_ne!(s.stroke_id, first);
                assert_eq!(s.tool, Tool::Eraser);
                assert_eq!(s.width_q, 40);
                assert_eq!(s.color, 7);
                assert!(cap.local_origin.contains(&s.stroke_id));
            }
            other => panic!("unexpected {:?}", other),
        }
        // restart dot is the last point before the split
        match &cap.sink()[5] {
            BoardOp::StrokeMoveBatch(b) => {
                assert_eq!(b.points, vec![quantize_point(NormPoint::new(0.5001, 0.5)); 2])
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_no_permit_no_ops() {
        let permit = DrawPermitFlag::new();
        permit.set(false);
        let mut cap = StrokeCapture::new(Vec::new(), LocalOrigin::new(), permit.clone());
        let t0 = Instant::now();
        assert!(cap.begin(NormPoint::new(0.5, 0.5), Tool::Pen, 0.01, 0, t0).is_none());
        cap.sample(NormPoint::new(0.6, 0.5), Tool::Pen, 0.01, t0);
        cap.end();
        assert!(cap.sink().is_empty());

        permit.set(true);
        assert!(cap.begin(NormPoint::new(0.5, 0.5), Tool::Pen, 0.01, 0, t0).is_some());
    }

    #[test]
    fn test_unbounded_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut cap = StrokeCapture::new(tx, LocalOrigin::new(), DrawPermitFlag::new());
        cap.begin(NormPoint::new(0.5, 0.5), Tool::Pen, 0.01, 0, Instant::now());
        cap.end();
        assert!(matches!(rx.try_recv(), Ok(BoardOp::StrokeStart(_))));
        assert!(matches!(rx.try_recv(), Ok(BoardOp::StrokeMoveBatch(_))));
        assert!(matches!(rx.try_recv(), Ok(BoardOp::StrokeEnd(_))));
    }
}
