//! Greedy IoU-based non-maximum suppression.

use crate::bbox::BBox;
use crate::candidate::topk::{sort_scored_desc, Scored};
use crate::util::{SparseDetError, SparseDetResult};

/// Suppresses overlapping boxes of a single class.
///
/// Candidates are visited in descending score order (earlier input wins on
/// equal scores). Each visited box that survives is kept and every later box
/// with `IoU >= iou_threshold` against it is discarded. Returns indices into
/// `boxes`, best first. Scores from different classes must not be mixed in
/// one call.
pub fn suppress(boxes: &[BBox], scores: &[f32], iou_threshold: f32) -> SparseDetResult<Vec<usize>> {
    if boxes.len() != scores.len() {
        return Err(SparseDetError::LengthMismatch {
            context: "suppress",
            left: boxes.len(),
            right: scores.len(),
        });
    }

    let mut order: Vec<Scored> = scores
        .iter()
        .enumerate()
        .map(|(index, &score)| Scored { index, score })
        .collect();
    sort_scored_desc(&mut order);

    let mut kept: Vec<usize> = Vec::new();
    'outer: for candidate in order {
        let b = &boxes[candidate.index];
        for &k in kept.iter() {
            if boxes[k].iou(b) >= iou_threshold {
                continue 'outer;
            }
        }
        kept.push(candidate.index);
    }

    Ok(kept)
}

/// Runs [`suppress`] on the subset `indices` of `boxes`/`scores`.
///
/// Returned values are entries of `indices`, best first. Every index must be
/// below `boxes.len()`.
pub fn suppress_subset(
    boxes: &[BBox],
    scores: &[f32],
    indices: &[usize],
    iou_threshold: f32,
) -> SparseDetResult<Vec<usize>> {
    if boxes.len() != scores.len() {
        return Err(SparseDetError::LengthMismatch {
            context: "suppress_subset",
            left: boxes.len(),
            right: scores.len(),
        });
    }
    if let Some(&index) = indices.iter().find(|&&i| i >= boxes.len()) {
        return Err(SparseDetError::IndexOutOfRange {
            context: "suppress_subset",
            index,
            len: boxes.len(),
        });
    }
    let sub_boxes: Vec<BBox> = indices.iter().map(|&i| boxes[i]).collect();
    let sub_scores: Vec<f32> = indices.iter().map(|&i| scores[i]).collect();
    let keep = suppress(&sub_boxes, &sub_scores, iou_threshold)?;
    Ok(keep.into_iter().map(|k| indices[k]).collect())
}

#[cfg(test)]
mod tests {
    use super::{suppress, suppress_subset};
    use crate::bbox::BBox;
    use crate::util::SparseDetError;

    #[test]
    fn equal_scores_keep_first_input() {
        let boxes = [
            BBox::new(0.0, 0.0, 10.0, 10.0),
            BBox::new(0.0, 0.0, 10.0, 10.0),
        ];
        let keep = suppress(&boxes, &[0.5, 0.5], 0.5).unwrap();
        assert_eq!(keep, vec![0]);
    }

    #[test]
    fn subset_maps_back_to_parent_indices() {
        let boxes = [
            BBox::new(0.0, 0.0, 10.0, 10.0),
            BBox::new(50.0, 50.0, 60.0, 60.0),
            BBox::new(0.5, 0.5, 10.0, 10.0),
        ];
        let scores = [0.3, 0.9, 0.8];
        let keep = suppress_subset(&boxes, &scores, &[0, 2], 0.5).unwrap();
        assert_eq!(keep, vec![2]);
    }

    #[test]
    fn subset_rejects_indices_past_the_end() {
        let boxes = [BBox::new(0.0, 0.0, 10.0, 10.0); 2];
        assert_eq!(
            suppress_subset(&boxes, &[0.5, 0.4], &[1, 2], 0.5),
            Err(SparseDetError::IndexOutOfRange {
                context: "suppress_subset",
                index: 2,
                len: 2,
            })
        );
        assert!(matches!(
            suppress_subset(&boxes, &[0.5], &[0], 0.5),
            Err(SparseDetError::LengthMismatch { .. })
        ));
    }
}
