//! Online model compression: masked pruning, baking and sparse storage.
//!
//! Layers advertise what they support through two capabilities:
//! - [`Prunable`] layers own a [`MaskedParameter`] and can be pruned and
//!   baked.
//! - [`SparseConvertible`] layers own a [`SparseDenseParameter`] and can
//!   switch between dense and sparse storage.
//!
//! A model exposes its layers through [`ParameterTree`], and the
//! [`CompressionController`] drives every compression step over that tree.

pub mod controller;
pub mod layer;
pub mod masked;
pub mod registry;
pub mod report;
pub mod sparse;

pub use controller::{CompressionController, PruneSummary, PruningPolicy};
pub use layer::{
    Conv2d, ConvLayer, Linear, LinearLayer, MaskedConv2d, MaskedLinear, SparseDenseLinear,
};
pub use masked::MaskedParameter;
pub use registry::{LayerMut, LayerRef, ParameterTree};
pub use report::{LayerNonzeros, NonzeroReport};
pub use sparse::{CooMatrix, SparseDenseParameter, Storage};

use crate::util::SparseDetResult;

/// A layer whose weight can be pruned through a keep-mask.
pub trait Prunable {
    fn param(&self) -> &MaskedParameter;

    fn param_mut(&mut self) -> &mut MaskedParameter;

    /// Clears the mask where `|weight| <= threshold`; returns the number of
    /// newly pruned entries.
    fn prune(&mut self, threshold: f32) -> SparseDetResult<usize> {
        self.param_mut().prune(threshold)
    }

    /// Folds the mask into the stored weight.
    fn bake(&mut self) -> SparseDetResult<()> {
        self.param_mut().bake()
    }
}

/// A layer whose weight storage can switch between dense and sparse.
pub trait SparseConvertible {
    fn param(&self) -> &SparseDenseParameter;

    fn param_mut(&mut self) -> &mut SparseDenseParameter;

    /// Switches to sparse storage; returns `false` if it already was.
    fn set_sparse(&mut self) -> SparseDetResult<bool> {
        if self.param().is_sparse() {
            return Ok(false);
        }
        self.param_mut().to_sparse()?;
        Ok(true)
    }

    /// Switches to dense storage; returns `false` if it already was.
    fn set_dense(&mut self) -> SparseDetResult<bool> {
        if !self.param().is_sparse() {
            return Ok(false);
        }
        self.param_mut().to_dense()?;
        Ok(true)
    }
}
