//! Coordinate-list sparse linear kernel.
//!
//! Computes `y = x W^T + b` straight from the stored `(row, col, value)`
//! entries; the dense weight is never materialised.

use crate::compress::sparse::CooMatrix;
use crate::kernel::check_linear_shapes;
use crate::tensor::Matrix;
use crate::util::{SparseDetError, SparseDetResult};

/// Sparse affine map over every row of `input`.
pub fn coo_linear(input: &Matrix, weight: &CooMatrix, bias: Option<&[f32]>) -> SparseDetResult<Matrix> {
    let (out_features, in_features) = weight.shape;
    if input.cols() != in_features {
        return Err(SparseDetError::ShapeMismatch {
            context: "sparse linear input".to_string(),
            expected: vec![input.rows(), in_features],
            got: vec![input.rows(), input.cols()],
        });
    }
    check_linear_shapes(in_features, out_features * in_features, out_features, bias)?;

    let mut out = Matrix::zeros(input.rows(), out_features);
    let in_data = input.as_slice();
    let out_data = out.as_mut_slice();
    for r in 0..input.rows() {
        let x = &in_data[r * in_features..(r + 1) * in_features];
        let y = &mut out_data[r * out_features..(r + 1) * out_features];
        if let Some(b) = bias {
            y.copy_from_slice(b);
        }
        for (o, i, w) in weight.iter() {
            y[o] += w * x[i];
        }
    }
    Ok(out)
}
