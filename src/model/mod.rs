//! Reference detector components and an architecture builder.
//!
//! [`ArchConfig::build`] assembles a [`ConvBackbone`], [`AnchorProposals`]
//! and [`RoiHead`] into a [`Detector`] with zero weights; real weights are
//! loaded with [`crate::checkpoint::load_state`].

pub mod backbone;
pub mod head;
pub mod rpn;
pub mod sequential;

pub use backbone::{BackboneStage, ConvBackbone};
pub use head::RoiHead;
pub use rpn::{AnchorProposals, ProposalConfig};
pub use sequential::{Sequential, Stage};

use crate::compress::layer::{
    Conv2d, ConvLayer, Linear, LinearLayer, MaskedConv2d, MaskedLinear, SparseDenseLinear,
};
use crate::detector::{Detector, DetectorConfig, FeatureExtractor};
use crate::kernel::scalar::ConvGeometry;
use crate::tensor::Matrix;
use crate::util::{SparseDetError, SparseDetResult};

/// One entry of the backbone layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvItem {
    /// 3x3 convolution (padding 1) with this many output channels, then ReLU.
    Conv(usize),
    /// 2x2 max pooling with stride 2.
    MaxPool,
}

/// Architecture of the reference detector.
#[derive(Clone, Debug, PartialEq)]
pub struct ArchConfig {
    pub in_channels: usize,
    pub features: Vec<ConvItem>,
    /// Build backbone convolutions as masked convolutions.
    pub mask_conv: bool,
    /// Build classifier layers as masked linear layers.
    pub mask_linear: bool,
    /// Build classifier layers as sparse-dense layers; wins over
    /// `mask_linear`.
    pub sparse_dense: bool,
    /// Output widths of the classifier's linear layers.
    pub hidden: Vec<usize>,
    pub pool_size: usize,
    /// Number of classes including background.
    pub n_class: usize,
    pub proposals: ProposalConfig,
}

impl Default for ArchConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            features: vec![
                ConvItem::Conv(16),
                ConvItem::MaxPool,
                ConvItem::Conv(32),
                ConvItem::MaxPool,
                ConvItem::Conv(32),
                ConvItem::MaxPool,
            ],
            mask_conv: false,
            mask_linear: true,
            sparse_dense: false,
            hidden: vec![256, 256],
            pool_size: 3,
            n_class: 21,
            proposals: ProposalConfig {
                anchor_scales: vec![2.0, 4.0, 8.0],
                ..ProposalConfig::default()
            },
        }
    }
}

impl ArchConfig {
    fn backbone(&self) -> SparseDetResult<ConvBackbone> {
        let mut stages = Vec::with_capacity(self.features.len() * 2);
        let mut channels = self.in_channels;
        for item in &self.features {
            match *item {
                ConvItem::Conv(out_channels) => {
                    let geom = ConvGeometry {
                        in_channels: channels,
                        out_channels,
                        kernel: 3,
                        stride: 1,
                        padding: 1,
                    };
                    let conv = if self.mask_conv {
                        ConvLayer::Masked(MaskedConv2d::zeros(geom))
                    } else {
                        ConvLayer::Dense(Conv2d::zeros(geom))
                    };
                    stages.push(BackboneStage::Conv(conv));
                    stages.push(BackboneStage::Relu);
                    channels = out_channels;
                }
                ConvItem::MaxPool => stages.push(BackboneStage::MaxPool),
            }
        }
        if channels == 0 {
            return Err(SparseDetError::InvalidDimensions {
                dims: vec![self.in_channels, channels],
            });
        }
        Ok(ConvBackbone::new(stages))
    }

    fn classifier_layer(&self, in_features: usize, out_features: usize) -> SparseDetResult<LinearLayer> {
        Ok(if self.sparse_dense {
            LinearLayer::SparseDense(SparseDenseLinear::new(
                Matrix::zeros(out_features, in_features),
                vec![0.0; out_features],
            )?)
        } else if self.mask_linear {
            LinearLayer::Masked(MaskedLinear::zeros(in_features, out_features))
        } else {
            LinearLayer::Dense(Linear::zeros(in_features, out_features))
        })
    }

    /// Assembles a zero-weight detector.
    pub fn build(&self, config: DetectorConfig) -> SparseDetResult<Detector> {
        let backbone = self.backbone()?;
        let channels = backbone.out_channels().unwrap_or(self.in_channels);
        let feat_stride = backbone.feat_stride();

        let mut width = channels * self.pool_size * self.pool_size;
        let mut stages = Vec::with_capacity(self.hidden.len() * 2);
        for &hidden in &self.hidden {
            stages.push(Stage::Linear(self.classifier_layer(width, hidden)?));
            stages.push(Stage::Relu);
            width = hidden;
        }
        let head = RoiHead::new(
            Sequential::new(stages),
            LinearLayer::Dense(Linear::zeros(width, self.n_class * 4)),
            LinearLayer::Dense(Linear::zeros(width, self.n_class)),
            self.pool_size,
            1.0 / feat_stride as f32,
        )?;
        let proposer = AnchorProposals::new(self.proposals.clone(), feat_stride);
        Ok(Detector::new(
            Box::new(backbone),
            Box::new(proposer),
            Box::new(head),
            config,
        ))
    }
}
