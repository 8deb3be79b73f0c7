//! Two-stage detector: feature extraction, region proposals and a
//! per-region classification/regression head, followed by box decoding and
//! per-class suppression.
//!
//! The three stages are trait objects so any backbone, proposal network or
//! head can be plugged in; the [`crate::model`] module ships a reference
//! implementation of each. Prediction takes `&self`, while compression goes
//! through [`Detector::compression`], which borrows the detector mutably.

pub(crate) mod postprocess;

use std::str::FromStr;

use crate::bbox::codec::LocNormalization;
use crate::bbox::BBox;
use crate::compress::registry::{prefixed, LayerMut, LayerRef, ParameterTree};
use crate::compress::CompressionController;
use crate::tensor::{ImageSize, Matrix, Tensor3};
use crate::trace::{trace_event, trace_span};
use crate::util::{SparseDetError, SparseDetResult};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Whether collaborators should behave as during training or inference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    Train,
    #[default]
    Eval,
}

/// Named threshold presets for [`Detector::use_preset`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Preset {
    /// Low score threshold, for computing mAP.
    Evaluate,
    /// High score threshold, for drawing results.
    Visualize,
}

impl Preset {
    /// `(score_threshold, iou_threshold)`.
    pub fn thresholds(self) -> (f32, f32) {
        match self {
            Preset::Evaluate => (0.05, 0.3),
            Preset::Visualize => (0.7, 0.3),
        }
    }
}

impl FromStr for Preset {
    type Err = SparseDetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "evaluate" => Ok(Preset::Evaluate),
            "visualize" => Ok(Preset::Visualize),
            other => Err(SparseDetError::UnknownPreset(other.to_string())),
        }
    }
}

/// Post-processing parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorConfig {
    /// Statistics the head's regression targets were normalised with.
    pub loc_norm: LocNormalization,
    /// Class probabilities must be strictly above this to be kept.
    pub score_threshold: f32,
    /// Suppression IoU threshold.
    pub iou_threshold: f32,
    /// Keep at most this many candidates per class before suppression.
    pub max_candidates_per_class: Option<usize>,
    /// Predict images in parallel (requires the `rayon` feature).
    pub parallel: bool,
}

impl DetectorConfig {
    pub fn from_preset(preset: Preset) -> Self {
        let (score_threshold, iou_threshold) = preset.thresholds();
        Self {
            loc_norm: LocNormalization::default(),
            score_threshold,
            iou_threshold,
            max_candidates_per_class: None,
            parallel: false,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::from_preset(Preset::Evaluate)
    }
}

/// Regions of interest with the index of the image each came from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Proposals {
    pub boxes: Vec<BBox>,
    pub batch_indices: Vec<usize>,
}

impl Proposals {
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

/// Raw head output for `R` regions.
#[derive(Clone, Debug, PartialEq)]
pub struct HeadOutput {
    /// `[R, n_class * 4]` normalised regression offsets.
    pub cls_locs: Matrix,
    /// `[R, n_class]` class logits, background first.
    pub scores: Matrix,
}

/// Detections for one image.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Detections {
    pub boxes: Vec<BBox>,
    /// Foreground class ids in `0..n_class - 1`.
    pub labels: Vec<usize>,
    pub scores: Vec<f32>,
}

impl Detections {
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

/// Backbone producing a feature map.
pub trait FeatureExtractor: ParameterTree + Send + Sync {
    fn extract(&self, image: &Tensor3) -> SparseDetResult<Tensor3>;

    /// Input pixels per feature cell.
    fn feat_stride(&self) -> usize;
}

/// Region proposal stage.
pub trait ProposalGenerator: ParameterTree + Send + Sync {
    fn propose(
        &self,
        features: &Tensor3,
        image_size: ImageSize,
        scale: f32,
        mode: Mode,
    ) -> SparseDetResult<Proposals>;
}

/// Per-region classification and box regression.
pub trait DetectionHead: ParameterTree + Send + Sync {
    fn forward(&self, features: &Tensor3, proposals: &Proposals) -> SparseDetResult<HeadOutput>;

    /// Number of classes including background.
    fn n_class(&self) -> usize;
}

/// A two-stage detector.
pub struct Detector {
    extractor: Box<dyn FeatureExtractor>,
    proposer: Box<dyn ProposalGenerator>,
    head: Box<dyn DetectionHead>,
    config: DetectorConfig,
    mode: Mode,
}

impl Detector {
    pub fn new(
        extractor: Box<dyn FeatureExtractor>,
        proposer: Box<dyn ProposalGenerator>,
        head: Box<dyn DetectionHead>,
        config: DetectorConfig,
    ) -> Self {
        Self {
            extractor,
            proposer,
            head,
            config,
            mode: Mode::default(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut DetectorConfig {
        &mut self.config
    }

    pub fn n_class(&self) -> usize {
        self.head.n_class()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Sets only the score and IoU thresholds.
    pub fn use_preset(&mut self, preset: Preset) {
        let (score_threshold, iou_threshold) = preset.thresholds();
        self.config.score_threshold = score_threshold;
        self.config.iou_threshold = iou_threshold;
    }

    /// Runs the three stages in the current mode.
    ///
    /// `scale` is the resize factor applied to the original image; the
    /// returned proposals are in the coordinates of `image`.
    pub fn forward(&self, image: &Tensor3, scale: f32) -> SparseDetResult<(HeadOutput, Proposals)> {
        self.run(image, scale, self.mode)
    }

    fn run(&self, image: &Tensor3, scale: f32, mode: Mode) -> SparseDetResult<(HeadOutput, Proposals)> {
        let features = self.extractor.extract(image)?;
        let proposals = self.proposer.propose(&features, image.size(), scale, mode)?;
        let output = self.head.forward(&features, &proposals)?;
        Ok((output, proposals))
    }

    /// Detects objects in images given at their original size.
    pub fn predict(&self, images: &[Tensor3]) -> SparseDetResult<Vec<Detections>> {
        let sizes: Vec<ImageSize> = images.iter().map(Tensor3::size).collect();
        self.predict_scaled(images, &sizes)
    }

    /// Detects objects in resized images.
    ///
    /// `original_sizes[i]` is the size `images[i]` was resized from; boxes
    /// are returned in original coordinates and clipped to that size.
    pub fn predict_scaled(
        &self,
        images: &[Tensor3],
        original_sizes: &[ImageSize],
    ) -> SparseDetResult<Vec<Detections>> {
        if images.len() != original_sizes.len() {
            return Err(SparseDetError::LengthMismatch {
                context: "predict images vs sizes",
                left: images.len(),
                right: original_sizes.len(),
            });
        }
        let _span = trace_span!("predict", images = images.len()).entered();

        #[cfg(feature = "rayon")]
        if self.config.parallel {
            let results: Vec<_> = images
                .par_iter()
                .zip(original_sizes.par_iter())
                .map(|(image, &size)| self.detect_one(image, size))
                .collect();
            return results.into_iter().collect();
        }

        images
            .iter()
            .zip(original_sizes)
            .map(|(image, &size)| self.detect_one(image, size))
            .collect()
    }

    fn detect_one(&self, image: &Tensor3, original: ImageSize) -> SparseDetResult<Detections> {
        let scale = image.width() as f32 / original.width;
        let _span = trace_span!("detect_image", scale = scale).entered();
        let (output, proposals) = self.run(image, scale, Mode::Eval)?;
        let rois: Vec<BBox> = proposals.boxes.iter().map(|b| b.unscale(scale)).collect();
        let detections =
            postprocess::detections(&rois, &output, self.n_class(), original, &self.config)?;
        trace_event!(
            "detections",
            rois = rois.len(),
            kept = detections.len()
        );
        Ok(detections)
    }

    /// Compression controller borrowing this detector's parameters.
    pub fn compression(&mut self) -> CompressionController<'_, Self> {
        CompressionController::new(self)
    }
}

impl ParameterTree for Detector {
    fn layers(&self) -> Vec<(String, LayerRef<'_>)> {
        let mut layers = prefixed("extractor", self.extractor.layers());
        layers.extend(prefixed("rpn", self.proposer.layers()));
        layers.extend(prefixed("head", self.head.layers()));
        layers
    }

    fn layers_mut(&mut self) -> Vec<(String, LayerMut<'_>)> {
        let mut layers = prefixed("extractor", self.extractor.layers_mut());
        layers.extend(prefixed("rpn", self.proposer.layers_mut()));
        layers.extend(prefixed("head", self.head.layers_mut()));
        layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_parse_and_apply() {
        assert_eq!("visualize".parse::<Preset>(), Ok(Preset::Visualize));
        assert_eq!(
            "fast".parse::<Preset>(),
            Err(SparseDetError::UnknownPreset("fast".to_string()))
        );
        let cfg = DetectorConfig::from_preset(Preset::Visualize);
        assert_eq!(cfg.score_threshold, 0.7);
        assert_eq!(cfg.iou_threshold, 0.3);
        assert_eq!(DetectorConfig::default().score_threshold, 0.05);
    }
}
