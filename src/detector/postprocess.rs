//! Turns raw head outputs into per-image detections.

use crate::bbox::codec::{decode_one, LocNormalization};
use crate::bbox::{BBox, Delta};
use crate::candidate::nms::suppress_subset;
use crate::candidate::topk::cap_candidates;
use crate::detector::{DetectorConfig, Detections, HeadOutput};
use crate::tensor::{ImageSize, Matrix};
use crate::util::math::softmax_rows;
use crate::util::{SparseDetError, SparseDetResult};

fn check_output(matrix: &Matrix, rows: usize, cols: usize, context: &str) -> SparseDetResult<()> {
    if matrix.shape() != [rows, cols] {
        return Err(SparseDetError::ShapeMismatch {
            context: context.to_string(),
            expected: vec![rows, cols],
            got: matrix.shape().to_vec(),
        });
    }
    Ok(())
}

/// Decodes one box per (RoI, class) pair, row-major over RoIs, clipped to
/// `size`.
pub(crate) fn class_boxes(
    rois: &[BBox],
    cls_locs: &Matrix,
    n_class: usize,
    loc_norm: &LocNormalization,
    size: ImageSize,
) -> SparseDetResult<Vec<BBox>> {
    check_output(cls_locs, rois.len(), n_class * 4, "roi_cls_locs")?;
    let mut boxes = Vec::with_capacity(rois.len() * n_class);
    for (roi, locs) in rois.iter().zip(cls_locs.as_slice().chunks_exact(4 * n_class.max(1))) {
        for raw in locs.chunks_exact(4) {
            let delta = loc_norm.denormalize(&Delta::new(raw[0], raw[1], raw[2], raw[3]));
            boxes.push(decode_one(roi, &delta).clip(size));
        }
    }
    Ok(boxes)
}

/// Softmax class probabilities, one row per RoI.
pub(crate) fn class_probabilities(scores: &Matrix, rows: usize, n_class: usize) -> SparseDetResult<Vec<f32>> {
    check_output(scores, rows, n_class, "roi_scores")?;
    let mut probs = scores.as_slice().to_vec();
    softmax_rows(&mut probs, n_class);
    Ok(probs)
}

/// Per foreground class: threshold, optional cap, suppression.
///
/// `boxes` and `probs` are both row-major `[rois, n_class]`.
///
/// Network class `l` is reported as label `l - 1`; class 0 is background and
/// never emitted.
pub(crate) fn select(
    boxes: &[BBox],
    probs: &[f32],
    n_class: usize,
    config: &DetectorConfig,
) -> SparseDetResult<Detections> {
    let rois = if n_class == 0 { 0 } else { probs.len() / n_class };
    let mut out = Detections::default();
    for class in 1..n_class {
        let mut candidates: Vec<usize> = (0..rois)
            .filter(|&r| probs[r * n_class + class] > config.score_threshold)
            .collect();
        if let Some(max) = config.max_candidates_per_class {
            if candidates.len() > max {
                let scores: Vec<f32> = candidates
                    .iter()
                    .map(|&r| probs[r * n_class + class])
                    .collect();
                candidates = cap_candidates(&scores, max)
                    .into_iter()
                    .map(|i| candidates[i])
                    .collect();
            }
        }
        let flat: Vec<usize> = candidates.iter().map(|&r| r * n_class + class).collect();
        for keep in suppress_subset(boxes, probs, &flat, config.iou_threshold)? {
            out.boxes.push(boxes[keep]);
            out.labels.push(class - 1);
            out.scores.push(probs[keep]);
        }
    }
    Ok(out)
}

/// Full post-processing for one image whose RoIs are already in original
/// image coordinates.
pub(crate) fn detections(
    rois: &[BBox],
    output: &HeadOutput,
    n_class: usize,
    size: ImageSize,
    config: &DetectorConfig,
) -> SparseDetResult<Detections> {
    let boxes = class_boxes(rois, &output.cls_locs, n_class, &config.loc_norm, size)?;
    let probs = class_probabilities(&output.scores, rois.len(), n_class)?;
    select(&boxes, &probs, n_class, config)
}
