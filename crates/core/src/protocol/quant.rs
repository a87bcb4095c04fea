//! Fixed-point quantization of normalized coordinates and widths
//!
//! Normalized values in `0..=1` travel as `i16`, which keeps a point at
//! 4 bytes on the wire with a precision of 1/scale.

use crate::types::{NormPoint, QPoint};

/// Position scale (coordinates)
pub const POS: i32 = 10_000;

/// Width scale (stroke thickness)
pub const WIDTH: i32 = 1_000;

/// Quantize a normalized value. Input is clamped to `0..=1` first.
pub fn quantize(value: f32, scale: i32) -> i16 {
    let v = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    let q = (v * scale as f32).round() as i32;
    q.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Inverse of [`quantize`].
pub fn dequantize(q: i16, scale: i32) -> f32 {
    q as f32 / scale as f32
}

pub fn quantize_point(p: NormPoint) -> QPoint {
    QPoint {
        x: quantize(p.x, POS),
        y: quantize(p.y, POS),
    }
}

pub fn dequantize_point(q: QPoint) -> NormPoint {
    NormPoint::new(dequantize(q.x, POS), dequantize(q.y, POS))
}

pub fn quantize_width(width: f32) -> i16 {
    quantize(width, WIDTH)
}

pub fn dequantize_width(q: i16) -> f32 {
    dequantize(q, WIDTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_within_one_step() {
        for scale in [POS, WIDTH] {
            for i in 0..=1000 {
                let v = i as f32 / 1000.0;
                let back = dequantize(quantize(v, scale), scale);
                assert!(
                    (back - v).abs() <= 1.0 / scale as f32,
                    "v={} back={} scale={}",
                    v,
                    back,
                    scale
                );
            }
        }
    }

    #[test]
    fn test_clamps_out_of_range() {
        assert_eq!(quantize(-0.5, POS), 0);
        assert_eq!(quantize(1.7, POS), 10_000);
        assert_eq!(quantize(f32::NAN, WIDTH), 0);
    }

    #[test]
    fn test_width_quantization() {
        assert_eq!(quantize_width(0.06), 60);
        assert!((dequantize_width(60) - 0.06).abs() < 1e-6);
    }

    #[test]
    fn test_point_quantization() {
        let q = quantize_point(NormPoint::new(0.1, 0.25));
        assert_eq!(q, QPoint { x: 1000, y: 2500 });
        let p = dequantize_point(q);
        assert!((p.x - 0.1).abs() < 1e-6);
        assert!((p.y - 0.25).abs() < 1e-6);
    }
}
