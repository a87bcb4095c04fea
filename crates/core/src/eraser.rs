//! Partial erase geometry
//!
//! A stroke point is erased when it lies within `eraser_radius + width / 2`
//! of any eraser point. Surviving points are grouped into maximal contiguous
//! runs; runs shorter than two points are dropped.

use crate::types::NormPoint;

/// Minimum number of points for a surviving run to become a stroke
pub const MIN_RUN_LEN: usize = 2;

/// Normalized eraser width used when a stroke start carries a zero width
pub const DEFAULT_ERASER_WIDTH: f32 = 0.03;

/// Id of the `k`-th surviving run of a split stroke
pub fn segment_id(parent: &str, k: usize) -> String {
    format!("{}#seg{}", parent, k)
}

/// Split a stroke's points against an eraser path.
///
/// Returns `None` when no point is hit, otherwise the surviving runs in order.
/// An empty result means the stroke is fully erased.
pub fn split_stroke(
    points: &[NormPoint],
    width: f32,
    eraser_pts: &[NormPoint],
    eraser_radius: f32,
) -> Option<Vec<Vec<NormPoint>>> {
    if points.is_empty() || eraser_pts.is_empty() {
        return None;
    }

    let thr = eraser_radius + width / 2.0;
    let thr2 = thr * thr;

    let erased: Vec<bool> = points
        .iter()
        .map(|p| eraser_pts.iter().any(|e| p.dist_sq(e) <= thr2))
        .collect();

    if !erased.iter().any(|&hit| hit) {
        return None;
    }

    let mut runs = Vec::new();
    let mut cur = Vec::new();
    for (p, &hit) in points.iter().zip(&erased) {
        if hit {
            if cur.len() >= MIN_RUN_LEN {
                runs.push(std::mem::take(&mut cur));
            } else {
                cur.clear();
            }
        } else {
            cur.push(*p);
        }
    }
    if cur.len() >= MIN_RUN_LEN {
        runs.push(cur);
    }

    Some(runs)
}
