//! Linear and convolution layers in their plain, masked and sparse-dense
//! variants.
//!
//! Which operations a layer supports is expressed through the
//! [`Prunable`] and [`SparseConvertible`] capabilities rather than by
//! inspecting type names; the `LinearLayer` / `ConvLayer` enums are the slots
//! a model stores and the compression controller swaps in place.

use crate::compress::masked::MaskedParameter;
use crate::compress::sparse::SparseDenseParameter;
use crate::compress::{Prunable, SparseConvertible};
use crate::kernel::scalar::{conv2d, ConvGeometry};
use crate::kernel::{DenseLinear, LinearKernel};
use crate::tensor::{Matrix, Tensor3};
use crate::util::{SparseDetError, SparseDetResult};

fn check_bias(bias: &[f32], out_features: usize, context: &str) -> SparseDetResult<()> {
    if bias.len() != out_features {
        return Err(SparseDetError::ShapeMismatch {
            context: context.to_string(),
            expected: vec![out_features],
            got: vec![bias.len()],
        });
    }
    Ok(())
}

/// Plain dense linear layer; never pruned.
#[derive(Clone, Debug, PartialEq)]
pub struct Linear {
    weight: Matrix,
    bias: Vec<f32>,
}

impl Linear {
    /// `weight` is `[out, in]`, `bias` has `out` entries.
    pub fn new(weight: Matrix, bias: Vec<f32>) -> SparseDetResult<Self> {
        check_bias(&bias, weight.rows(), "linear bias")?;
        Ok(Self { weight, bias })
    }

    pub fn zeros(in_features: usize, out_features: usize) -> Self {
        Self {
            weight: Matrix::zeros(out_features, in_features),
            bias: vec![0.0; out_features],
        }
    }

    pub fn weight(&self) -> &Matrix {
        &self.weight
    }

    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    pub fn forward(&self, input: &Matrix) -> SparseDetResult<Matrix> {
        DenseLinear::linear(
            input,
            self.weight.as_slice(),
            self.weight.rows(),
            Some(&self.bias),
        )
    }
}

/// Linear layer whose weight is gated by a pruning mask.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskedLinear {
    weight: MaskedParameter,
    bias: Vec<f32>,
    in_features: usize,
    out_features: usize,
}

impl MaskedLinear {
    /// `weight` is `[out, in]`; the mask starts all-true.
    pub fn new(weight: Matrix, bias: Vec<f32>) -> SparseDetResult<Self> {
        let (out_features, in_features) = (weight.rows(), weight.cols());
        check_bias(&bias, out_features, "masked linear bias")?;
        Ok(Self {
            weight: MaskedParameter::new(weight.into_vec(), vec![out_features, in_features])?,
            bias,
            in_features,
            out_features,
        })
    }

    pub fn zeros(in_features: usize, out_features: usize) -> Self {
        Self {
            weight: MaskedParameter::zeros(vec![out_features, in_features]),
            bias: vec![0.0; out_features],
            in_features,
            out_features,
        }
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    pub(crate) fn set_bias(&mut self, bias: Vec<f32>) -> SparseDetResult<()> {
        check_bias(&bias, self.out_features, "masked linear bias")?;
        self.bias = bias;
        Ok(())
    }

    pub(crate) fn set_param(&mut self, param: MaskedParameter) -> SparseDetResult<()> {
        if param.shape() != self.weight.shape() {
            return Err(SparseDetError::ShapeMismatch {
                context: "masked linear weight".to_string(),
                expected: self.weight.shape().to_vec(),
                got: param.shape().to_vec(),
            });
        }
        self.weight = param;
        Ok(())
    }

    /// Forward pass with the effective (`weight * mask`) weight; the bias is
    /// never masked.
    pub fn forward(&self, input: &Matrix) -> SparseDetResult<Matrix> {
        let effective = self.weight.effective_weight();
        DenseLinear::linear(input, &effective, self.out_features, Some(&self.bias))
    }
}

impl Prunable for MaskedLinear {
    fn param(&self) -> &MaskedParameter {
        &self.weight
    }

    fn param_mut(&mut self) -> &mut MaskedParameter {
        &mut self.weight
    }
}

/// Linear layer backed by switchable dense/sparse storage.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseDenseLinear {
    weight: SparseDenseParameter,
    bias: Vec<f32>,
}

impl SparseDenseLinear {
    pub fn new(weight: Matrix, bias: Vec<f32>) -> SparseDetResult<Self> {
        check_bias(&bias, weight.rows(), "sparse-dense bias")?;
        Ok(Self {
            weight: SparseDenseParameter::dense(weight),
            bias,
        })
    }

    /// Builds the equivalent layer from a masked layer's baked weight.
    pub fn from_masked(masked: &MaskedLinear) -> SparseDetResult<Self> {
        let weight = Matrix::from_vec(
            masked.param().effective_weight(),
            masked.out_features,
            masked.in_features,
        )?;
        Self::new(weight, masked.bias.clone())
    }

    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    pub(crate) fn set_bias(&mut self, bias: Vec<f32>) -> SparseDetResult<()> {
        check_bias(&bias, self.weight.shape().0, "sparse-dense bias")?;
        self.bias = bias;
        Ok(())
    }

    pub(crate) fn set_weight(&mut self, weight: Matrix) -> SparseDetResult<()> {
        let (rows, cols) = self.weight.shape();
        if weight.shape() != [rows, cols] {
            return Err(SparseDetError::ShapeMismatch {
                context: "sparse-dense weight".to_string(),
                expected: vec![rows, cols],
                got: weight.shape().to_vec(),
            });
        }
        let was_sparse = self.weight.is_sparse();
        self.weight = SparseDenseParameter::dense(weight);
        if was_sparse {
            self.weight.to_sparse()?;
        }
        Ok(())
    }

    pub fn forward(&self, input: &Matrix) -> SparseDetResult<Matrix> {
        self.weight.forward(input, Some(&self.bias))
    }
}

impl SparseConvertible for SparseDenseLinear {
    fn param(&self) -> &SparseDenseParameter {
        &self.weight
    }

    fn param_mut(&mut self) -> &mut SparseDenseParameter {
        &mut self.weight
    }
}

/// Plain dense 2D convolution.
#[derive(Clone, Debug, PartialEq)]
pub struct Conv2d {
    weight: Vec<f32>,
    bias: Vec<f32>,
    geom: ConvGeometry,
}

impl Conv2d {
    pub fn new(weight: Vec<f32>, bias: Vec<f32>, geom: ConvGeometry) -> SparseDetResult<Self> {
        let shape = geom.weight_shape();
        if weight.len() != shape.iter().product::<usize>() {
            return Err(SparseDetError::ShapeMismatch {
                context: "conv2d weight".to_string(),
                expected: shape,
                got: vec![weight.len()],
            });
        }
        check_bias(&bias, geom.out_channels, "conv2d bias")?;
        Ok(Self { weight, bias, geom })
    }

    pub fn zeros(geom: ConvGeometry) -> Self {
        Self {
            weight: vec![0.0; geom.weight_shape().iter().product()],
            bias: vec![0.0; geom.out_channels],
            geom,
        }
    }

    pub fn geometry(&self) -> ConvGeometry {
        self.geom
    }

    pub fn weight(&self) -> &[f32] {
        &self.weight
    }

    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    pub fn forward(&self, input: &Tensor3) -> SparseDetResult<Tensor3> {
        conv2d(input, &self.weight, Some(&self.bias), self.geom)
    }
}

/// 2D convolution whose kernel is gated by a pruning mask.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskedConv2d {
    weight: MaskedParameter,
    bias: Vec<f32>,
    geom: ConvGeometry,
}

impl MaskedConv2d {
    pub fn new(weight: Vec<f32>, bias: Vec<f32>, geom: ConvGeometry) -> SparseDetResult<Self> {
        check_bias(&bias, geom.out_channels, "masked conv2d bias")?;
        Ok(Self {
            weight: MaskedParameter::new(weight, geom.weight_shape())?,
            bias,
            geom,
        })
    }

    pub fn zeros(geom: ConvGeometry) -> Self {
        Self {
            weight: MaskedParameter::zeros(geom.weight_shape()),
            bias: vec![0.0; geom.out_channels],
            geom,
        }
    }

    pub fn geometry(&self) -> ConvGeometry {
        self.geom
    }

    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    pub(crate) fn set_bias(&mut self, bias: Vec<f32>) -> SparseDetResult<()> {
        check_bias(&bias, self.geom.out_channels, "masked conv2d bias")?;
        self.bias = bias;
        Ok(())
    }

    pub(crate) fn set_param(&mut self, param: MaskedParameter) -> SparseDetResult<()> {
        if param.shape() != self.weight.shape() {
            return Err(SparseDetError::ShapeMismatch {
                context: "masked conv2d weight".to_string(),
                expected: self.weight.shape().to_vec(),
                got: param.shape().to_vec(),
            });
        }
        self.weight = param;
        Ok(())
    }

    pub fn forward(&self, input: &Tensor3) -> SparseDetResult<Tensor3> {
        let effective = self.weight.effective_weight();
        conv2d(input, &effective, Some(&self.bias), self.geom)
    }
}

impl Prunable for MaskedConv2d {
    fn param(&self) -> &MaskedParameter {
        &self.weight
    }

    fn param_mut(&mut self) -> &mut MaskedParameter {
        &mut self.weight
    }
}

/// A linear slot in a model.
#[derive(Clone, Debug, PartialEq)]
pub enum LinearLayer {
    Dense(Linear),
    Masked(MaskedLinear),
    SparseDense(SparseDenseLinear),
}

impl LinearLayer {
    pub fn kind(&self) -> &'static str {
        match self {
            LinearLayer::Dense(_) => "linear",
            LinearLayer::Masked(_) => "masked_linear",
            LinearLayer::SparseDense(_) => "sparse_dense_linear",
        }
    }

    /// `(out_features, in_features)`.
    pub fn dims(&self) -> (usize, usize) {
        match self {
            LinearLayer::Dense(l) => (l.weight.rows(), l.weight.cols()),
            LinearLayer::Masked(l) => (l.out_features, l.in_features),
            LinearLayer::SparseDense(l) => l.weight.shape(),
        }
    }

    pub fn forward(&self, input: &Matrix) -> SparseDetResult<Matrix> {
        match self {
            LinearLayer::Dense(l) => l.forward(input),
            LinearLayer::Masked(l) => l.forward(input),
            LinearLayer::SparseDense(l) => l.forward(input),
        }
    }

    pub fn as_prunable_mut(&mut self) -> Option<&mut dyn Prunable> {
        match self {
            LinearLayer::Masked(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_prunable(&self) -> Option<&dyn Prunable> {
        match self {
            LinearLayer::Masked(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_sparse_convertible_mut(&mut self) -> Option<&mut dyn SparseConvertible> {
        match self {
            LinearLayer::SparseDense(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_sparse_convertible(&self) -> Option<&dyn SparseConvertible> {
        match self {
            LinearLayer::SparseDense(l) => Some(l),
            _ => None,
        }
    }
}

/// A convolution slot in a model.
#[derive(Clone, Debug, PartialEq)]
pub enum ConvLayer {
    Dense(Conv2d),
    Masked(MaskedConv2d),
}

impl ConvLayer {
    pub fn kind(&self) -> &'static str {
        match self {
            ConvLayer::Dense(_) => "conv2d",
            ConvLayer::Masked(_) => "masked_conv2d",
        }
    }

    pub fn geometry(&self) -> ConvGeometry {
        match self {
            ConvLayer::Dense(c) => c.geom,
            ConvLayer::Masked(c) => c.geom,
        }
    }

    pub fn forward(&self, input: &Tensor3) -> SparseDetResult<Tensor3> {
        match self {
            ConvLayer::Dense(c) => c.forward(input),
            ConvLayer::Masked(c) => c.forward(input),
        }
    }

    pub fn as_prunable_mut(&mut self) -> Option<&mut dyn Prunable> {
        match self {
            ConvLayer::Masked(c) => Some(c),
            ConvLayer::Dense(_) => None,
        }
    }

    pub fn as_prunable(&self) -> Option<&dyn Prunable> {
        match self {
            ConvLayer::Masked(c) => Some(c),
            ConvLayer::Dense(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights() -> Matrix {
        Matrix::from_vec(vec![0.5, -0.01, 0.02, 1.0], 2, 2).unwrap()
    }

    #[test]
    fn masked_forward_ignores_pruned_entries_but_not_bias() {
        let mut layer = MaskedLinear::new(weights(), vec![1.0, -1.0]).unwrap();
        layer.prune(0.05).unwrap();
        let x = Matrix::from_vec(vec![2.0, 3.0], 1, 2).unwrap();
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.as_slice(), &[2.0, 2.0]);
    }

    #[test]
    fn sparse_dense_layer_matches_masked_after_bake() {
        let mut masked = MaskedLinear::new(weights(), vec![0.0, 0.25]).unwrap();
        masked.prune(0.05).unwrap();
        masked.bake().unwrap();
        let mut sd = SparseDenseLinear::from_masked(&masked).unwrap();
        let x = Matrix::from_vec(vec![1.0, -2.0, 0.5, 4.0], 2, 2).unwrap();
        let expected = masked.forward(&x).unwrap();
        assert_eq!(sd.forward(&x).unwrap(), expected);
        sd.set_sparse().unwrap();
        assert_eq!(sd.forward(&x).unwrap(), expected);
    }

    #[test]
    fn capabilities_follow_variants() {
        let mut dense = LinearLayer::Dense(Linear::zeros(2, 2));
        assert!(dense.as_prunable_mut().is_none());
        assert!(dense.as_sparse_convertible_mut().is_none());
        let mut masked = LinearLayer::Masked(MaskedLinear::zeros(2, 2));
        assert!(masked.as_prunable_mut().is_some());
        let geom = ConvGeometry {
            in_channels: 1,
            out_channels: 1,
            kernel: 3,
            stride: 1,
            padding: 1,
        };
        let mut conv = ConvLayer::Masked(MaskedConv2d::zeros(geom));
        assert!(conv.as_prunable_mut().is_some());
        assert_eq!(conv.kind(), "masked_conv2d");
    }
}
