//! SIMD dense linear kernel using the `wide` crate.
//!
//! The dot product processes 8 lanes at a time with `f32x8` and finishes the
//! tail with a scalar loop.

use crate::kernel::LinearKernel;
use wide::f32x8;

const LANES: usize = 8;

/// Load 8 f32 values into f32x8.
#[inline]
fn load_f32x8(slice: &[f32]) -> f32x8 {
    f32x8::from([
        slice[0], slice[1], slice[2], slice[3], slice[4], slice[5], slice[6], slice[7],
    ])
}

/// Horizontal sum of f32x8.
#[inline]
fn hsum(v: f32x8) -> f32 {
    let arr = v.to_array();
    arr[0] + arr[1] + arr[2] + arr[3] + arr[4] + arr[5] + arr[6] + arr[7]
}

/// SIMD-accelerated dense linear kernel.
pub struct DenseSimd;

impl LinearKernel for DenseSimd {
    #[inline]
    fn dot(a: &[f32], b: &[f32]) -> f32 {
        let len = a.len().min(b.len());
        let simd_end = len / LANES * LANES;
        let mut acc = f32x8::ZERO;
        let mut i = 0;
        while i < simd_end {
            acc += load_f32x8(&a[i..]) * load_f32x8(&b[i..]);
            i += LANES;
        }
        let mut tail = 0.0f32;
        while i < len {
            tail += a[i] * b[i];
            i += 1;
        }
        hsum(acc) + tail
    }
}

#[cfg(test)]
mod tests {
    use super::DenseSimd;
    use crate::kernel::scalar::DenseScalar;
    use crate::kernel::LinearKernel;

    #[test]
    fn simd_dot_matches_scalar() {
        let a: Vec<f32> = (0..19).map(|v| v as f32 * 0.25 - 2.0).collect();
        let b: Vec<f32> = (0..19).map(|v| 1.0 - v as f32 * 0.1).collect();
        let simd = DenseSimd::dot(&a, &b);
        let scalar = DenseScalar::dot(&a, &b);
        assert!((simd - scalar).abs() < 1e-4);
    }
}
