//! Ordered stack of linear layers and activations.

use crate::compress::layer::LinearLayer;
use crate::compress::registry::{LayerMut, LayerRef, ParameterTree};
use crate::tensor::Matrix;
use crate::util::{SparseDetError, SparseDetResult};

#[derive(Clone, Debug, PartialEq)]
pub enum Stage {
    Linear(LinearLayer),
    Relu,
}

/// Layers are named by their stage index, so `[Linear, Relu, Linear]`
/// exposes `0` and `2`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sequential {
    stages: Vec<Stage>,
}

impl Sequential {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Width of the output, or `None` when there is no linear stage.
    pub fn out_features(&self) -> Option<usize> {
        self.stages.iter().rev().find_map(|stage| match stage {
            Stage::Linear(l) => Some(l.dims().0),
            Stage::Relu => None,
        })
    }

    pub fn forward(&self, input: &Matrix) -> SparseDetResult<Matrix> {
        let mut x = input.clone();
        for (index, stage) in self.stages.iter().enumerate() {
            match stage {
                Stage::Linear(layer) => {
                    let (_, in_features) = layer.dims();
                    if x.cols() != in_features {
                        return Err(SparseDetError::ShapeMismatch {
                            context: format!("sequential stage {index}"),
                            expected: vec![x.rows(), in_features],
                            got: x.shape().to_vec(),
                        });
                    }
                    x = layer.forward(&x)?;
                }
                Stage::Relu => x.relu_in_place(),
            }
        }
        Ok(x)
    }
}

impl ParameterTree for Sequential {
    fn layers(&self) -> Vec<(String, LayerRef<'_>)> {
        self.stages
            .iter()
            .enumerate()
            .filter_map(|(index, stage)| match stage {
                Stage::Linear(l) => Some((index.to_string(), LayerRef::Linear(l))),
                Stage::Relu => None,
            })
            .collect()
    }

    fn layers_mut(&mut self) -> Vec<(String, LayerMut<'_>)> {
        self.stages
            .iter_mut()
            .enumerate()
            .filter_map(|(index, stage)| match stage {
                Stage::Linear(l) => Some((index.to_string(), LayerMut::Linear(l))),
                Stage::Relu => None,
            })
            .collect()
    }
}
