//! RoI pooling head with a fully connected classifier.

use crate::bbox::BBox;
use crate::compress::layer::LinearLayer;
use crate::compress::registry::{prefixed, LayerMut, LayerRef, ParameterTree};
use crate::detector::{DetectionHead, HeadOutput, Proposals};
use crate::model::sequential::Sequential;
use crate::tensor::{Matrix, Tensor3};
use crate::trace::trace_span;
use crate::util::{SparseDetError, SparseDetResult};

/// Averages `features` inside `roi` over a `pool x pool` grid.
///
/// `out` receives `channels * pool * pool` values, channel-major. Each bin
/// covers at least one feature cell.
fn roi_average_pool(features: &Tensor3, roi: &BBox, pool: usize, spatial_scale: f32, out: &mut [f32]) {
    let (h, w) = (features.height(), features.width());
    let y0 = ((roi.y_min * spatial_scale).floor().max(0.0) as usize).min(h - 1);
    let x0 = ((roi.x_min * spatial_scale).floor().max(0.0) as usize).min(w - 1);
    let y1 = ((roi.y_max * spatial_scale).ceil().max(0.0) as usize).clamp(y0 + 1, h);
    let x1 = ((roi.x_max * spatial_scale).ceil().max(0.0) as usize).clamp(x0 + 1, w);
    let (rh, rw) = (y1 - y0, x1 - x0);

    let mut idx = 0;
    for c in 0..features.channels() {
        for py in 0..pool {
            let ys = y0 + py * rh / pool;
            let ye = (y0 + (py + 1) * rh / pool).max(ys + 1);
            for px in 0..pool {
                let xs = x0 + px * rw / pool;
                let xe = (x0 + (px + 1) * rw / pool).max(xs + 1);
                let mut sum = 0.0f32;
                for y in ys..ye {
                    for x in xs..xe {
                        sum += features.at(c, y, x);
                    }
                }
                out[idx] = sum / ((ye - ys) * (xe - xs)) as f32;
                idx += 1;
            }
        }
    }
}

/// Detection head: RoI pooling, classifier stack, then class scores and
/// per-class box offsets.
#[derive(Clone, Debug, PartialEq)]
pub struct RoiHead {
    classifier: Sequential,
    cls_loc: LinearLayer,
    score: LinearLayer,
    pool: usize,
    spatial_scale: f32,
    n_class: usize,
}

impl RoiHead {
    /// `cls_loc` must produce `n_class * 4` outputs and `score` `n_class`,
    /// where `n_class` is taken from `score`.
    pub fn new(
        classifier: Sequential,
        cls_loc: LinearLayer,
        score: LinearLayer,
        pool: usize,
        spatial_scale: f32,
    ) -> SparseDetResult<Self> {
        let n_class = score.dims().0;
        if cls_loc.dims().0 != n_class * 4 {
            return Err(SparseDetError::ShapeMismatch {
                context: "cls_loc outputs".to_string(),
                expected: vec![n_class * 4],
                got: vec![cls_loc.dims().0],
            });
        }
        Ok(Self {
            classifier,
            cls_loc,
            score,
            pool: pool.max(1),
            spatial_scale,
            n_class,
        })
    }

    pub fn pool(&self) -> usize {
        self.pool
    }

    fn pooled(&self, features: &Tensor3, rois: &[BBox]) -> SparseDetResult<Matrix> {
        let cols = features.channels() * self.pool * self.pool;
        let mut pooled = Matrix::zeros(rois.len(), cols);
        if cols == 0 {
            return Ok(pooled);
        }
        for (roi, row) in rois.iter().zip(pooled.as_mut_slice().chunks_exact_mut(cols)) {
            roi_average_pool(features, roi, self.pool, self.spatial_scale, row);
        }
        Ok(pooled)
    }
}

impl DetectionHead for RoiHead {
    fn forward(&self, features: &Tensor3, proposals: &Proposals) -> SparseDetResult<HeadOutput> {
        let _span = trace_span!("roi_head", rois = proposals.len()).entered();
        let pooled = self.pooled(features, &proposals.boxes)?;
        let fc = self.classifier.forward(&pooled)?;
        Ok(HeadOutput {
            cls_locs: self.cls_loc.forward(&fc)?,
            scores: self.score.forward(&fc)?,
        })
    }

    fn n_class(&self) -> usize {
        self.n_class
    }
}

impl ParameterTree for RoiHead {
    fn layers(&self) -> Vec<(String, LayerRef<'_>)> {
        let mut layers = prefixed("classifier", self.classifier.layers());
        layers.push(("cls_loc".to_string(), LayerRef::Linear(&self.cls_loc)));
        layers.push(("score".to_string(), LayerRef::Linear(&self.score)));
        layers
    }

    fn layers_mut(&mut self) -> Vec<(String, LayerMut<'_>)> {
        let mut layers = prefixed("classifier", self.classifier.layers_mut());
        layers.push(("cls_loc".to_string(), LayerMut::Linear(&mut self.cls_loc)));
        layers.push(("score".to_string(), LayerMut::Linear(&mut self.score)));
        layers
    }
}
