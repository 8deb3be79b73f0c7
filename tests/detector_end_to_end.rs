use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sparsedet::{
    BBox, DetectionHead, Detector, DetectorConfig, FeatureExtractor, HeadOutput, ImageSize,
    Matrix, Mode, ParameterTree, Preset, ProposalGenerator, Proposals, SparseDetError,
    SparseDetResult, Tensor3,
};

struct Identity;

impl ParameterTree for Identity {}

impl FeatureExtractor for Identity {
    fn extract(&self, image: &Tensor3) -> SparseDetResult<Tensor3> {
        Ok(image.clone())
    }

    fn feat_stride(&self) -> usize {
        1
    }
}

/// Returns fixed boxes; only the first one while training.
struct FixedProposals(Vec<BBox>);

impl ParameterTree for FixedProposals {}

impl ProposalGenerator for FixedProposals {
    fn propose(&self, _: &Tensor3, _: ImageSize, _: f32, mode: Mode) -> SparseDetResult<Proposals> {
        let boxes = match mode {
            Mode::Train => self.0[..1].to_vec(),
            Mode::Eval => self.0.clone(),
        };
        Ok(Proposals {
            batch_indices: vec![0; boxes.len()],
            boxes,
        })
    }
}

struct FixedHead {
    cls_locs: Matrix,
    scores: Matrix,
}

impl ParameterTree for FixedHead {}

impl DetectionHead for FixedHead {
    fn forward(&self, _: &Tensor3, proposals: &Proposals) -> SparseDetResult<HeadOutput> {
        let rows = proposals.len();
        let take = |m: &Matrix| Matrix::from_vec(m.as_slice()[..rows * m.cols()].to_vec(), rows, m.cols());
        Ok(HeadOutput {
            cls_locs: take(&self.cls_locs)?,
            scores: take(&self.scores)?,
        })
    }

    fn n_class(&self) -> usize {
        self.scores.cols()
    }
}

fn detector(rois: Vec<BBox>, cls_locs: Matrix, scores: Matrix) -> Detector {
    Detector::new(
        Box::new(Identity),
        Box::new(FixedProposals(rois)),
        Box::new(FixedHead { cls_locs, scores }),
        DetectorConfig::default(),
    )
}

fn three_rois() -> Vec<BBox> {
    vec![
        BBox::new(0.0, 0.0, 10.0, 10.0),
        BBox::new(1.0, 1.0, 11.0, 11.0),
        BBox::new(20.0, 20.0, 30.0, 30.0),
    ]
}

fn logits(rows: &[[f32; 3]]) -> Matrix {
    Matrix::from_vec(rows.iter().flatten().copied().collect(), rows.len(), 3).unwrap()
}

#[test]
fn per_class_suppression_and_label_shift() {
    let det = detector(
        three_rois(),
        Matrix::zeros(3, 12),
        logits(&[[0.0, 5.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 5.0]]),
    );
    let out = det.predict(&[Tensor3::zeros(3, 40, 40)]).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(
        out[0].boxes,
        vec![BBox::new(0.0, 0.0, 10.0, 10.0), BBox::new(20.0, 20.0, 30.0, 30.0)]
    );
    assert_eq!(out[0].labels, vec![0, 1]);
    assert!(out[0].scores.iter().all(|&s| s > 0.05 && s <= 1.0));
}

#[test]
fn visualize_preset_raises_the_bar() {
    let mut det = detector(
        three_rois(),
        Matrix::zeros(3, 12),
        logits(&[[0.0, 5.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 0.5]]),
    );
    det.use_preset(Preset::Visualize);
    assert_eq!(det.config().score_threshold, 0.7);
    let out = det.predict(&[Tensor3::zeros(3, 40, 40)]).unwrap();
    assert_eq!(out[0].labels, vec![0]);

    det.use_preset("evaluate".parse().unwrap());
    let out = det.predict(&[Tensor3::zeros(3, 40, 40)]).unwrap();
    // roi 2 clears 0.05 for class 1 (p ~ 0.27) and class 2 (p ~ 0.45)
    assert_eq!(out[0].labels, vec![0, 0, 1]);
    assert_eq!(
        out[0].boxes,
        vec![
            BBox::new(0.0, 0.0, 10.0, 10.0),
            BBox::new(20.0, 20.0, 30.0, 30.0),
            BBox::new(20.0, 20.0, 30.0, 30.0),
        ]
    );
    assert!(out[0].scores.iter().all(|&s| s > 0.05));
}

#[test]
fn regression_offsets_move_boxes() {
    let mut locs = vec![0.0f32; 12];
    locs[4] = 1.0; // class 1 dy, denormalized to 0.1
    let det = detector(
        vec![BBox::new(0.0, 0.0, 10.0, 10.0)],
        Matrix::from_vec(locs, 1, 12).unwrap(),
        logits(&[[0.0, 5.0, 0.0]]),
    );
    let out = det.predict(&[Tensor3::zeros(1, 40, 40)]).unwrap();
    let b = out[0].boxes[0];
    let expected = BBox::new(1.0, 0.0, 11.0, 10.0);
    for (a, e) in b.to_array().iter().zip(expected.to_array().iter()) {
        assert!((a - e).abs() < 1e-5);
    }
}

#[test]
fn scaled_prediction_returns_original_coordinates() {
    let det = detector(
        vec![BBox::new(0.0, 0.0, 10.0, 10.0), BBox::new(15.0, 15.0, 25.0, 25.0)],
        Matrix::zeros(2, 12),
        logits(&[[0.0, 5.0, 0.0], [0.0, 4.0, 0.0]]),
    );
    let out = det
        .predict_scaled(&[Tensor3::zeros(3, 20, 20)], &[ImageSize::new(40.0, 40.0)])
        .unwrap();
    assert_eq!(
        out[0].boxes,
        vec![BBox::new(0.0, 0.0, 20.0, 20.0), BBox::new(30.0, 30.0, 40.0, 40.0)]
    );

    let err = det.predict_scaled(&[Tensor3::zeros(3, 20, 20)], &[]).unwrap_err();
    assert!(matches!(err, SparseDetError::LengthMismatch { .. }));
}

#[test]
fn forward_follows_mode_but_predict_always_evaluates() {
    let mut det = detector(
        three_rois(),
        Matrix::zeros(3, 12),
        logits(&[[0.0, 5.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 5.0]]),
    );
    det.set_mode(Mode::Train);
    assert_eq!(det.mode(), Mode::Train);
    let image = Tensor3::zeros(3, 40, 40);
    let (output, proposals) = det.forward(&image, 1.0).unwrap();
    assert_eq!(proposals.len(), 1);
    assert_eq!(output.scores.shape(), [1, 3]);
    assert_eq!(det.predict(&[image]).unwrap()[0].len(), 2);
    assert_eq!(det.n_class(), 3);
}

#[test]
fn empty_proposals_give_empty_detections() {
    let det = detector(Vec::new(), Matrix::zeros(0, 12), Matrix::zeros(0, 3));
    let out = det.predict(&[Tensor3::zeros(3, 8, 8), Tensor3::zeros(3, 8, 8)]).unwrap();
    assert_eq!(out.len(), 2);
    assert!(out.iter().all(|d| d.is_empty()));
}

#[test]
fn random_heads_respect_thresholds() {
    let mut rng = StdRng::seed_from_u64(21);
    let n_class = 5;
    let rois: Vec<BBox> = (0..120)
        .map(|_| {
            let y = rng.random_range(0.0f32..80.0);
            let x = rng.random_range(0.0f32..80.0);
            BBox::new(y, x, y + rng.random_range(4.0f32..30.0), x + rng.random_range(4.0f32..30.0))
        })
        .collect();
    let locs = (0..120 * n_class * 4).map(|_| rng.random_range(-1.0f32..1.0)).collect();
    let scores = (0..120 * n_class).map(|_| rng.random_range(-3.0f32..3.0)).collect();
    let det = detector(
        rois,
        Matrix::from_vec(locs, 120, n_class * 4).unwrap(),
        Matrix::from_vec(scores, 120, n_class).unwrap(),
    );
    let cfg = det.config().clone();
    let out = det.predict(&[Tensor3::zeros(1, 100, 100)]).unwrap().remove(0);
    assert!(!out.is_empty());
    for i in 0..out.len() {
        assert!(out.scores[i] > cfg.score_threshold);
        assert!(out.labels[i] < n_class - 1);
        let b = out.boxes[i];
        assert!(b.y_min >= 0.0 && b.x_min >= 0.0 && b.y_max <= 100.0 && b.x_max <= 100.0);
        for j in i + 1..out.len() {
            if out.labels[i] == out.labels[j] {
                assert!(out.boxes[i].iou(&out.boxes[j]) < cfg.iou_threshold);
            }
        }
    }
}
