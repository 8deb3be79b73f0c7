//! Scalar reference kernels: dense dot product, 2D convolution, pooling.

use crate::kernel::LinearKernel;
use crate::tensor::Tensor3;
use crate::util::{SparseDetError, SparseDetResult};

/// Scalar dense linear kernel.
pub struct DenseScalar;

impl LinearKernel for DenseScalar {
    #[inline]
    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }
}

/// Geometry of a square 2D convolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConvGeometry {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
}

impl ConvGeometry {
    /// Weight shape `[out, in, k, k]`.
    pub fn weight_shape(&self) -> Vec<usize> {
        vec![self.out_channels, self.in_channels, self.kernel, self.kernel]
    }

    /// Output spatial size for an input of `height x width`.
    pub fn output_size(&self, height: usize, width: usize) -> Option<(usize, usize)> {
        let stride = self.stride.max(1);
        let padded_h = height + 2 * self.padding;
        let padded_w = width + 2 * self.padding;
        if padded_h < self.kernel || padded_w < self.kernel {
            return None;
        }
        Some((
            (padded_h - self.kernel) / stride + 1,
            (padded_w - self.kernel) / stride + 1,
        ))
    }
}

/// Direct 2D convolution with zero padding.
///
/// `weight` is `[out, in, k, k]` row-major; the caller passes the effective
/// (already masked) weights.
pub fn conv2d(
    input: &Tensor3,
    weight: &[f32],
    bias: Option<&[f32]>,
    geom: ConvGeometry,
) -> SparseDetResult<Tensor3> {
    if input.channels() != geom.in_channels {
        return Err(SparseDetError::ShapeMismatch {
            context: "conv2d input channels".to_string(),
            expected: vec![geom.in_channels],
            got: vec![input.channels()],
        });
    }
    let k = geom.kernel;
    let expected_len = geom.out_channels * geom.in_channels * k * k;
    if weight.len() != expected_len {
        return Err(SparseDetError::ShapeMismatch {
            context: "conv2d weight".to_string(),
            expected: geom.weight_shape(),
            got: vec![weight.len()],
        });
    }
    let (out_h, out_w) = geom.output_size(input.height(), input.width()).ok_or(
        SparseDetError::InvalidDimensions {
            dims: vec![input.height(), input.width(), k],
        },
    )?;

    let stride = geom.stride.max(1);
    let pad = geom.padding as isize;
    let in_h = input.height() as isize;
    let in_w = input.width() as isize;
    let mut out = Tensor3::zeros(geom.out_channels, out_h, out_w);
    let out_data = out.as_mut_slice();

    for oc in 0..geom.out_channels {
        let b = bias.map_or(0.0, |b| b[oc]);
        for oy in 0..out_h {
            for ox in 0..out_w {
                let mut acc = b;
                for ic in 0..geom.in_channels {
                    let w_base = (oc * geom.in_channels + ic) * k * k;
                    for ky in 0..k {
                        let iy = (oy * stride + ky) as isize - pad;
                        if iy < 0 || iy >= in_h {
                            continue;
                        }
                        for kx in 0..k {
                            let ix = (ox * stride + kx) as isize - pad;
                            if ix < 0 || ix >= in_w {
                                continue;
                            }
                            let w = weight[w_base + ky * k + kx];
                            if w != 0.0 {
                                acc += w * input.at(ic, iy as usize, ix as usize);
                            }
                        }
                    }
                }
                out_data[(oc * out_h + oy) * out_w + ox] = acc;
            }
        }
    }
    Ok(out)
}

/// 2x2 max pooling with stride 2; odd trailing rows/columns are dropped.
pub fn max_pool2(input: &Tensor3) -> SparseDetResult<Tensor3> {
    let out_h = input.height() / 2;
    let out_w = input.width() / 2;
    if out_h == 0 || out_w == 0 {
        return Err(SparseDetError::InvalidDimensions {
            dims: vec![input.channels(), input.height(), input.width()],
        });
    }
    let mut out = Tensor3::zeros(input.channels(), out_h, out_w);
    let out_data = out.as_mut_slice();
    for c in 0..input.channels() {
        for y in 0..out_h {
            for x in 0..out_w {
                let m = input
                    .at(c, 2 * y, 2 * x)
                    .max(input.at(c, 2 * y, 2 * x + 1))
                    .max(input.at(c, 2 * y + 1, 2 * x))
                    .max(input.at(c, 2 * y + 1, 2 * x + 1));
                out_data[(c * out_h + y) * out_w + x] = m;
            }
        }
    }
    Ok(out)
}
