//! VGG-style convolutional feature extractor.

use crate::compress::layer::ConvLayer;
use crate::compress::registry::{LayerMut, LayerRef, ParameterTree};
use crate::detector::FeatureExtractor;
use crate::kernel::scalar::max_pool2;
use crate::tensor::Tensor3;
use crate::trace::trace_span;
use crate::util::SparseDetResult;

#[derive(Clone, Debug, PartialEq)]
pub enum BackboneStage {
    Conv(ConvLayer),
    Relu,
    MaxPool,
}

/// Convolution / ReLU / 2x2 max-pool stack; each pool halves the
/// resolution, so the feature stride is `2^pools`.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvBackbone {
    stages: Vec<BackboneStage>,
}

impl ConvBackbone {
    pub fn new(stages: Vec<BackboneStage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[BackboneStage] {
        &self.stages
    }

    /// Channels of the produced feature map, if any convolution exists.
    pub fn out_channels(&self) -> Option<usize> {
        self.stages.iter().rev().find_map(|stage| match stage {
            BackboneStage::Conv(c) => Some(c.geometry().out_channels),
            _ => None,
        })
    }
}

impl FeatureExtractor for ConvBackbone {
    fn extract(&self, image: &Tensor3) -> SparseDetResult<Tensor3> {
        let _span = trace_span!("extract", stages = self.stages.len()).entered();
        let mut x = image.clone();
        for stage in &self.stages {
            match stage {
                BackboneStage::Conv(conv) => x = conv.forward(&x)?,
                BackboneStage::Relu => x.relu_in_place(),
                BackboneStage::MaxPool => x = max_pool2(&x)?,
            }
        }
        Ok(x)
    }

    fn feat_stride(&self) -> usize {
        let pools = self
            .stages
            .iter()
            .filter(|s| matches!(s, BackboneStage::MaxPool))
            .count();
        1usize << pools
    }
}

impl ParameterTree for ConvBackbone {
    fn layers(&self) -> Vec<(String, LayerRef<'_>)> {
        self.stages
            .iter()
            .enumerate()
            .filter_map(|(index, stage)| match stage {
                BackboneStage::Conv(c) => Some((index.to_string(), LayerRef::Conv(c))),
                _ => None,
            })
            .collect()
    }

    fn layers_mut(&mut self) -> Vec<(String, LayerMut<'_>)> {
        self.stages
            .iter_mut()
            .enumerate()
            .filter_map(|(index, stage)| match stage {
                BackboneStage::Conv(c) => Some((index.to_string(), LayerMut::Conv(c))),
                _ => None,
            })
            .collect()
    }
}
