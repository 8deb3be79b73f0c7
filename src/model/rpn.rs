//! Anchor-based region proposals.
//!
//! Anchors of every scale/ratio combination are centred on each feature
//! cell. Objectness is the mean activation of the cell across channels, so
//! the generator carries no parameters of its own.

use crate::bbox::BBox;
use crate::candidate::nms::suppress;
use crate::candidate::topk::cap_candidates;
use crate::compress::registry::ParameterTree;
use crate::detector::{Mode, ProposalGenerator, Proposals};
use crate::tensor::{ImageSize, Tensor3};
use crate::trace::{trace_event, trace_span};
use crate::util::SparseDetResult;

/// Proposal counts and filters; the defaults are the usual Faster R-CNN
/// settings.
#[derive(Clone, Debug, PartialEq)]
pub struct ProposalConfig {
    /// Anchor side multipliers of the base size.
    pub anchor_scales: Vec<f32>,
    /// Anchor height/width ratios.
    pub anchor_ratios: Vec<f32>,
    pub nms_threshold: f32,
    pub train_pre_nms: usize,
    pub train_post_nms: usize,
    pub eval_pre_nms: usize,
    pub eval_post_nms: usize,
    /// Minimum side in original-image pixels; multiplied by the scale.
    pub min_size: f32,
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            anchor_scales: vec![8.0, 16.0, 32.0],
            anchor_ratios: vec![0.5, 1.0, 2.0],
            nms_threshold: 0.7,
            train_pre_nms: 12000,
            train_post_nms: 2000,
            eval_pre_nms: 6000,
            eval_post_nms: 300,
            min_size: 16.0,
        }
    }
}

impl ProposalConfig {
    fn counts(&self, mode: Mode) -> (usize, usize) {
        match mode {
            Mode::Train => (self.train_pre_nms, self.train_post_nms),
            Mode::Eval => (self.eval_pre_nms, self.eval_post_nms),
        }
    }
}

/// Parameter-free proposal generator.
#[derive(Clone, Debug, PartialEq)]
pub struct AnchorProposals {
    config: ProposalConfig,
    feat_stride: usize,
}

impl AnchorProposals {
    pub fn new(config: ProposalConfig, feat_stride: usize) -> Self {
        Self {
            config,
            feat_stride: feat_stride.max(1),
        }
    }

    pub fn config(&self) -> &ProposalConfig {
        &self.config
    }

    /// `(height, width)` of each anchor shape around a cell centre.
    fn anchor_shapes(&self) -> Vec<(f32, f32)> {
        let base = self.feat_stride as f32;
        let mut shapes = Vec::with_capacity(self.config.anchor_ratios.len() * self.config.anchor_scales.len());
        for &ratio in &self.config.anchor_ratios {
            for &scale in &self.config.anchor_scales {
                let h = base * scale * ratio.sqrt();
                let w = base * scale * (1.0 / ratio).sqrt();
                shapes.push((h, w));
            }
        }
        shapes
    }

    /// Every anchor on the feature grid and the objectness of its cell.
    pub fn anchors(&self, features: &Tensor3) -> (Vec<BBox>, Vec<f32>) {
        let shapes = self.anchor_shapes();
        let stride = self.feat_stride as f32;
        let (h, w) = (features.height(), features.width());
        let cells = h * w;
        let mut boxes = Vec::with_capacity(cells * shapes.len());
        let mut scores = Vec::with_capacity(cells * shapes.len());
        let channels = features.channels().max(1) as f32;
        for y in 0..h {
            for x in 0..w {
                let objectness = (0..features.channels())
                    .map(|c| features.at(c, y, x))
                    .sum::<f32>()
                    / channels;
                let cy = y as f32 * stride + stride / 2.0;
                let cx = x as f32 * stride + stride / 2.0;
                for &(ah, aw) in &shapes {
                    boxes.push(BBox::from_center(cy, cx, ah, aw));
                    scores.push(objectness);
                }
            }
        }
        (boxes, scores)
    }
}

impl ProposalGenerator for AnchorProposals {
    fn propose(
        &self,
        features: &Tensor3,
        image_size: ImageSize,
        scale: f32,
        mode: Mode,
    ) -> SparseDetResult<Proposals> {
        let _span = trace_span!("propose", cells = features.height() * features.width()).entered();
        let (pre_nms, post_nms) = self.config.counts(mode);
        let (anchors, objectness) = self.anchors(features);

        let min_size = self.config.min_size * scale;
        let mut boxes = Vec::with_capacity(anchors.len());
        let mut scores = Vec::with_capacity(anchors.len());
        for (anchor, score) in anchors.iter().zip(objectness) {
            let clipped = anchor.clip(image_size);
            if clipped.height() >= min_size && clipped.width() >= min_size {
                boxes.push(clipped);
                scores.push(score);
            }
        }

        let order = cap_candidates(&scores, pre_nms);
        let top_boxes: Vec<BBox> = order.iter().map(|&i| boxes[i]).collect();
        let top_scores: Vec<f32> = order.iter().map(|&i| scores[i]).collect();
        let mut keep = suppress(&top_boxes, &top_scores, self.config.nms_threshold)?;
        keep.truncate(post_nms);

        let boxes: Vec<BBox> = keep.into_iter().map(|k| top_boxes[k]).collect();
        trace_event!("proposals", anchors = anchors.len(), kept = boxes.len());
        Ok(Proposals {
            batch_indices: vec![0; boxes.len()],
            boxes,
        })
    }
}

impl ParameterTree for AnchorProposals {}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> AnchorProposals {
        let config = ProposalConfig {
            anchor_scales: vec![1.0, 2.0],
            anchor_ratios: vec![1.0],
            min_size: 1.0,
            ..ProposalConfig::default()
        };
        AnchorProposals::new(config, 4)
    }

    #[test]
    fn anchors_cover_every_cell() {
        let (boxes, scores) = generator().anchors(&Tensor3::zeros(2, 3, 5));
        assert_eq!(boxes.len(), 3 * 5 * 2);
        assert_eq!(scores.len(), boxes.len());
        assert_eq!(boxes[0], BBox::new(0.0, 0.0, 4.0, 4.0));
    }

    #[test]
    fn proposals_favour_active_cells_and_respect_counts() {
        let mut features = Tensor3::zeros(1, 4, 4);
        features.as_mut_slice()[5] = 10.0;
        let gen = AnchorProposals::new(
            ProposalConfig {
                eval_post_nms: 3,
                ..generator().config().clone()
            },
            4,
        );
        let proposals = gen
            .propose(&features, ImageSize::new(16.0, 16.0), 1.0, Mode::Eval)
            .unwrap();
        assert_eq!(proposals.len(), 3);
        assert_eq!(proposals.batch_indices, vec![0; 3]);
        // cell (1, 1) centred at (6, 6)
        assert_eq!(proposals.boxes[0], BBox::new(4.0, 4.0, 8.0, 8.0));
    }

    #[test]
    fn small_boxes_are_dropped() {
        let gen = AnchorProposals::new(
            ProposalConfig {
                min_size: 100.0,
                ..generator().config().clone()
            },
            4,
        );
        let proposals = gen
            .propose(&Tensor3::zeros(1, 2, 2), ImageSize::new(8.0, 8.0), 1.0, Mode::Train)
            .unwrap();
        assert!(proposals.is_empty());
    }
}
