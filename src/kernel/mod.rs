//! Numeric kernels behind the layer forward passes.
//!
//! The dense linear kernel is abstracted behind [`LinearKernel`] so the
//! `simd` feature can swap in a vectorised dot product; sparse and
//! convolution kernels have a single scalar implementation.

use crate::tensor::Matrix;
use crate::util::{SparseDetError, SparseDetResult};

/// Kernel computing `y = x W^T + b` for a row-major dense `W`.
pub trait LinearKernel {
    /// Dot product of two equally long slices.
    fn dot(a: &[f32], b: &[f32]) -> f32;

    /// Applies the affine map to every row of `input`.
    ///
    /// `weight` is `[out_features, input.cols()]` row-major and `bias`, when
    /// present, has `out_features` entries.
    fn linear(
        input: &Matrix,
        weight: &[f32],
        out_features: usize,
        bias: Option<&[f32]>,
    ) -> SparseDetResult<Matrix> {
        let in_features = input.cols();
        check_linear_shapes(in_features, weight.len(), out_features, bias)?;
        let mut out = Matrix::zeros(input.rows(), out_features);
        let out_data = out.as_mut_slice();
        let in_data = input.as_slice();
        for r in 0..input.rows() {
            let x = &in_data[r * in_features..(r + 1) * in_features];
            let out_row = &mut out_data[r * out_features..(r + 1) * out_features];
            for (o, value) in out_row.iter_mut().enumerate() {
                let w = &weight[o * in_features..(o + 1) * in_features];
                *value = Self::dot(x, w) + bias.map_or(0.0, |b| b[o]);
            }
        }
        Ok(out)
    }
}

pub(crate) fn check_linear_shapes(
    in_features: usize,
    weight_len: usize,
    out_features: usize,
    bias: Option<&[f32]>,
) -> SparseDetResult<()> {
    if weight_len != out_features * in_features {
        return Err(SparseDetError::ShapeMismatch {
            context: "linear weight".to_string(),
            expected: vec![out_features, in_features],
            got: vec![weight_len],
        });
    }
    if let Some(b) = bias {
        if b.len() != out_features {
            return Err(SparseDetError::ShapeMismatch {
                context: "linear bias".to_string(),
                expected: vec![out_features],
                got: vec![b.len()],
            });
        }
    }
    Ok(())
}

pub mod scalar;
pub mod sparse;

#[cfg(feature = "simd")]
pub mod simd;

/// Dense linear kernel used by the layers: SIMD when available.
#[cfg(not(feature = "simd"))]
pub(crate) type DenseLinear = scalar::DenseScalar;
#[cfg(feature = "simd")]
pub(crate) type DenseLinear = simd::DenseSimd;
