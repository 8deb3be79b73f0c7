//! Box codec between `reference + delta` and absolute coordinates.
//!
//! Deltas follow the usual R-CNN parameterisation: centre offsets scaled by
//! the reference size and log-space size ratios. The codec knows nothing
//! about image bounds; callers clip decoded boxes themselves.

use crate::bbox::{BBox, Delta};
use crate::util::{SparseDetError, SparseDetResult};

/// Upper bound applied to `dh`/`dw` before exponentiation.
///
/// Caps a decoded side at 62.5x the reference side, so untrained or
/// adversarial deltas decode to large but finite boxes.
pub const MAX_LOG_SCALE: f32 = 4.135_166_6; // ln(1000 / 16)

/// Bound on `|dy|`/`|dx|` in reference units before decoding.
pub const MAX_CENTER_OFFSET: f32 = 1.0e4;

/// NaN maps to no shift; anything else is clamped to the offset bound.
fn bounded_offset(d: f32) -> f32 {
    if d.is_nan() {
        0.0
    } else {
        d.clamp(-MAX_CENTER_OFFSET, MAX_CENTER_OFFSET)
    }
}

/// Encodes `target` relative to `reference`.
///
/// Fails with [`SparseDetError::DegenerateBox`] if the reference has
/// non-positive height or width.
pub fn encode_one(index: usize, reference: &BBox, target: &BBox) -> SparseDetResult<Delta> {
    let rh = reference.height();
    let rw = reference.width();
    if rh <= 0.0 || rw <= 0.0 {
        return Err(SparseDetError::DegenerateBox {
            index,
            height: rh,
            width: rw,
        });
    }
    Ok(Delta::new(
        (target.center_y() - reference.center_y()) / rh,
        (target.center_x() - reference.center_x()) / rw,
        (target.height() / rh).ln(),
        (target.width() / rw).ln(),
    ))
}

/// Encodes every `(reference[i], target[i])` pair.
pub fn encode(reference: &[BBox], target: &[BBox]) -> SparseDetResult<Vec<Delta>> {
    if reference.len() != target.len() {
        return Err(SparseDetError::LengthMismatch {
            context: "encode",
            left: reference.len(),
            right: target.len(),
        });
    }
    reference
        .iter()
        .zip(target)
        .enumerate()
        .map(|(i, (r, t))| encode_one(i, r, t))
        .collect()
}

/// Applies `delta` to `reference`. Never fails: size terms are clamped to
/// [`MAX_LOG_SCALE`] and centre offsets to [`MAX_CENTER_OFFSET`], so a finite
/// reference always decodes to a finite box.
pub fn decode_one(reference: &BBox, delta: &Delta) -> BBox {
    let rh = reference.height();
    let rw = reference.width();
    let y_c = bounded_offset(delta.dy) * rh + reference.center_y();
    let x_c = bounded_offset(delta.dx) * rw + reference.center_x();
    let h = delta.dh.min(MAX_LOG_SCALE).exp() * rh;
    let w = delta.dw.min(MAX_LOG_SCALE).exp() * rw;
    BBox::from_center(y_c, x_c, h, w)
}

/// Decodes every `(reference[i], deltas[i])` pair.
pub fn decode(reference: &[BBox], deltas: &[Delta]) -> SparseDetResult<Vec<BBox>> {
    if reference.len() != deltas.len() {
        return Err(SparseDetError::LengthMismatch {
            context: "decode",
            left: reference.len(),
            right: deltas.len(),
        });
    }
    Ok(reference
        .iter()
        .zip(deltas)
        .map(|(r, d)| decode_one(r, d))
        .collect())
}

/// Fixed calibration applied to raw head regressions before decoding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocNormalization {
    pub mean: [f32; 4],
    pub std: [f32; 4],
}

impl Default for LocNormalization {
    fn default() -> Self {
        Self {
            mean: [0.0; 4],
            std: [0.1, 0.1, 0.2, 0.2],
        }
    }
}

impl LocNormalization {
    /// Maps a raw network output to a delta: `raw * std + mean`.
    pub fn denormalize(&self, raw: &Delta) -> Delta {
        let r = raw.to_array();
        Delta::new(
            r[0] * self.std[0] + self.mean[0],
            r[1] * self.std[1] + self.mean[1],
            r[2] * self.std[2] + self.mean[2],
            r[3] * self.std[3] + self.mean[3],
        )
    }

    /// Inverse of [`denormalize`](Self::denormalize).
    pub fn normalize(&self, delta: &Delta) -> Delta {
        let d = delta.to_array();
        Delta::new(
            (d[0] - self.mean[0]) / self.std[0],
            (d[1] - self.mean[1]) / self.std[1],
            (d[2] - self.mean[2]) / self.std[2],
            (d[3] - self.mean[3]) / self.std[3],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_delta_is_identity() {
        let r = BBox::new(2.0, 3.0, 12.0, 9.0);
        assert_eq!(decode_one(&r, &Delta::default()), r);
    }

    #[test]
    fn huge_size_delta_stays_finite() {
        let r = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = decode_one(&r, &Delta::new(0.0, 0.0, 1e6, 1e6));
        assert!(b.y_max.is_finite() && b.x_max.is_finite());
        assert!((b.height() - 625.0).abs() < 0.1);
    }

    #[test]
    fn non_finite_offsets_decode_to_finite_boxes() {
        let r = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = decode_one(&r, &Delta::new(f32::MAX, 0.0, f32::INFINITY, f32::NAN));
        assert!(b.to_array().iter().all(|v| v.is_finite()), "{b:?}");
        assert!((b.center_y() - (5.0 + MAX_CENTER_OFFSET * 10.0)).abs() < 1.0);
        let b = decode_one(&r, &Delta::new(f32::NAN, f32::NEG_INFINITY, 0.0, 0.0));
        assert_eq!(b.center_y(), 5.0);
        assert!(b.to_array().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn normalization_round_trips() {
        let norm = LocNormalization::default();
        let d = Delta::new(0.3, -0.2, 0.5, 0.1);
        let back = norm.denormalize(&norm.normalize(&d));
        for (a, b) in back.to_array().iter().zip(d.to_array().iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}
