//! Hierarchical layer enumeration.
//!
//! Models expose every layer slot under a dotted name such as
//! `extractor.conv3` or `head.classifier.0`. The compression controller and
//! the checkpoint store work purely through this view.

use crate::compress::layer::{ConvLayer, LinearLayer};
use crate::compress::{Prunable, SparseConvertible};

/// Shared view of one layer slot.
#[derive(Clone, Copy, Debug)]
pub enum LayerRef<'a> {
    Linear(&'a LinearLayer),
    Conv(&'a ConvLayer),
}

/// Mutable view of one layer slot; the slot itself can be replaced.
#[derive(Debug)]
pub enum LayerMut<'a> {
    Linear(&'a mut LinearLayer),
    Conv(&'a mut ConvLayer),
}

impl<'a> LayerRef<'a> {
    pub fn kind(&self) -> &'static str {
        match self {
            LayerRef::Linear(l) => l.kind(),
            LayerRef::Conv(c) => c.kind(),
        }
    }

    pub fn as_prunable(&self) -> Option<&'a dyn Prunable> {
        match *self {
            LayerRef::Linear(l) => l.as_prunable(),
            LayerRef::Conv(c) => c.as_prunable(),
        }
    }

    pub fn as_sparse_convertible(&self) -> Option<&'a dyn SparseConvertible> {
        match *self {
            LayerRef::Linear(l) => l.as_sparse_convertible(),
            LayerRef::Conv(_) => None,
        }
    }

    /// `(nonzero, total)` weight entries, counting effective values.
    pub fn weight_counts(&self) -> (usize, usize) {
        match *self {
            LayerRef::Linear(LinearLayer::Dense(l)) => count_nonzero(l.weight().as_slice()),
            LayerRef::Linear(LinearLayer::Masked(l)) => {
                (l.param().nonzero_count(), l.param().len())
            }
            LayerRef::Linear(LinearLayer::SparseDense(l)) => {
                let (rows, cols) = SparseConvertible::param(l).shape();
                (SparseConvertible::param(l).nnz(), rows * cols)
            }
            LayerRef::Conv(ConvLayer::Dense(c)) => count_nonzero(c.weight()),
            LayerRef::Conv(ConvLayer::Masked(c)) => (c.param().nonzero_count(), c.param().len()),
        }
    }
}

impl<'a> LayerMut<'a> {
    pub fn kind(&self) -> &'static str {
        match self {
            LayerMut::Linear(l) => l.kind(),
            LayerMut::Conv(c) => c.kind(),
        }
    }

    pub fn into_prunable(self) -> Option<&'a mut dyn Prunable> {
        match self {
            LayerMut::Linear(l) => l.as_prunable_mut(),
            LayerMut::Conv(c) => c.as_prunable_mut(),
        }
    }

    pub fn into_sparse_convertible(self) -> Option<&'a mut dyn SparseConvertible> {
        match self {
            LayerMut::Linear(l) => l.as_sparse_convertible_mut(),
            LayerMut::Conv(_) => None,
        }
    }
}

fn count_nonzero(values: &[f32]) -> (usize, usize) {
    (values.iter().filter(|&&v| v != 0.0).count(), values.len())
}

/// A model component whose layers can be enumerated by name.
///
/// Components without parameters keep the empty defaults.
pub trait ParameterTree {
    fn layers(&self) -> Vec<(String, LayerRef<'_>)> {
        Vec::new()
    }

    fn layers_mut(&mut self) -> Vec<(String, LayerMut<'_>)> {
        Vec::new()
    }
}

/// Prepends `prefix.` to every name.
pub(crate) fn prefixed<T>(prefix: &str, items: Vec<(String, T)>) -> Vec<(String, T)> {
    items
        .into_iter()
        .map(|(name, item)| (format!("{prefix}.{name}"), item))
        .collect()
}

/// Every prunable layer of `tree`, in enumeration order.
pub(crate) fn prunables<T: ParameterTree + ?Sized>(
    tree: &mut T,
) -> Vec<(String, &mut dyn Prunable)> {
    tree.layers_mut()
        .into_iter()
        .filter_map(|(name, layer)| layer.into_prunable().map(|p| (name, p)))
        .collect()
}

/// Every sparse-convertible layer of `tree`, in enumeration order.
pub(crate) fn sparse_convertibles<T: ParameterTree + ?Sized>(
    tree: &mut T,
) -> Vec<(String, &mut dyn SparseConvertible)> {
    tree.layers_mut()
        .into_iter()
        .filter_map(|(name, layer)| layer.into_sparse_convertible().map(|p| (name, p)))
        .collect()
}
