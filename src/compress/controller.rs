//! Compression steps applied to a live model.
//!
//! The controller borrows the model mutably for its whole lifetime, so no
//! inference can observe a half-pruned or half-converted model.

use crate::compress::layer::{ConvLayer, LinearLayer, SparseDenseLinear};
use crate::compress::registry::{prunables, sparse_convertibles, LayerMut, ParameterTree};
use crate::compress::report::NonzeroReport;
use crate::trace::{trace_event, trace_span, trace_warn};
use crate::util::math::{percentile, std_dev};
use crate::util::{SparseDetError, SparseDetResult};

/// How a pruning threshold is derived.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PruningPolicy {
    /// One threshold for the whole model: the `q`-th percentile of the
    /// magnitudes of all alive masked weights.
    GlobalPercentile { q: f32 },
    /// One threshold per layer: `sensitivity * std(weight)`.
    PerLayerStd { sensitivity: f32 },
}

impl PruningPolicy {
    pub const DEFAULT_PERCENTILE: f32 = 5.0;
    pub const DEFAULT_SENSITIVITY: f32 = 0.25;
}

impl Default for PruningPolicy {
    fn default() -> Self {
        PruningPolicy::PerLayerStd {
            sensitivity: Self::DEFAULT_SENSITIVITY,
        }
    }
}

/// Outcome of one pruning pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PruneSummary {
    /// Threshold applied to each pruned layer, in enumeration order.
    pub thresholds: Vec<(String, f32)>,
    /// Weights whose mask bit this pass cleared.
    pub newly_pruned: usize,
}

/// Drives pruning, baking, conversion and storage toggles over a model.
pub struct CompressionController<'m, M: ParameterTree + ?Sized> {
    model: &'m mut M,
}

impl<'m, M: ParameterTree + ?Sized> CompressionController<'m, M> {
    pub fn new(model: &'m mut M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        self.model
    }

    /// Prunes every masked layer at the `q`-th percentile of the pooled
    /// alive weight magnitudes.
    ///
    /// Only weights whose effective value is nonzero enter the pool; when no
    /// such weight exists nothing is pruned.
    pub fn prune_global_percentile(&mut self, q: f32) -> SparseDetResult<PruneSummary> {
        if !(0.0..=100.0).contains(&q) {
            return Err(SparseDetError::InvalidPercentile(q));
        }
        let _span = trace_span!("prune_global_percentile", q = q).entered();
        let mut layers = prunables(&mut *self.model);
        let mut pool: Vec<f32> = layers
            .iter()
            .flat_map(|(_, layer)| layer.param().alive_magnitudes())
            .collect();
        let Some(threshold) = percentile(&mut pool, q) else {
            trace_event!("empty_pool", layers = layers.len());
            return Ok(PruneSummary::default());
        };
        trace_event!("global_threshold", threshold = threshold, pool = pool.len());

        let mut summary = PruneSummary::default();
        for (name, layer) in layers.iter_mut() {
            summary.newly_pruned += layer.prune(threshold)?;
            summary.thresholds.push((name.clone(), threshold));
        }
        trace_event!("pruned", newly_pruned = summary.newly_pruned);
        Ok(summary)
    }

    /// Prunes each masked layer at `sensitivity` times the population
    /// standard deviation of its stored weights.
    pub fn prune_by_std(&mut self, sensitivity: f32) -> SparseDetResult<PruneSummary> {
        let _span = trace_span!("prune_by_std", sensitivity = sensitivity).entered();
        let mut summary = PruneSummary::default();
        for (name, layer) in prunables(&mut *self.model) {
            let threshold = sensitivity * std_dev(layer.param().weight());
            let newly = layer.prune(threshold)?;
            trace_event!(
                "layer_pruned",
                layer = name.as_str(),
                threshold = threshold,
                newly_pruned = newly
            );
            summary.newly_pruned += newly;
            summary.thresholds.push((name, threshold));
        }
        Ok(summary)
    }

    pub fn prune(&mut self, policy: PruningPolicy) -> SparseDetResult<PruneSummary> {
        match policy {
            PruningPolicy::GlobalPercentile { q } => self.prune_global_percentile(q),
            PruningPolicy::PerLayerStd { sensitivity } => self.prune_by_std(sensitivity),
        }
    }

    /// Folds every mask into its weight. Returns the number of layers baked.
    pub fn bake_all(&mut self) -> SparseDetResult<usize> {
        let _span = trace_span!("bake_all").entered();
        let mut baked = 0usize;
        for (_, layer) in prunables(&mut *self.model) {
            layer.bake()?;
            baked += 1;
        }
        trace_event!("baked", layers = baked);
        Ok(baked)
    }

    /// Replaces every masked linear layer with an equivalent sparse-dense
    /// layer built from its effective weight.
    ///
    /// Masked convolutions have no sparse-dense counterpart and stay as they
    /// are. Returns the number of converted layers.
    pub fn convert_to_sparse_dense(&mut self) -> SparseDetResult<usize> {
        let _span = trace_span!("convert_to_sparse_dense").entered();
        let mut converted = 0usize;
        for (name, layer) in self.model.layers_mut() {
            match layer {
                LayerMut::Linear(slot) => {
                    if let LinearLayer::Masked(masked) = &*slot {
                        let replacement = SparseDenseLinear::from_masked(masked)?;
                        *slot = LinearLayer::SparseDense(replacement);
                        converted += 1;
                    }
                }
                LayerMut::Conv(ConvLayer::Masked(_)) => {
                    trace_warn!(
                        "conversion_skipped",
                        layer = name.as_str(),
                        kind = "masked_conv2d"
                    );
                }
                LayerMut::Conv(_) => {}
            }
        }
        trace_event!("converted", layers = converted);
        Ok(converted)
    }

    /// Converts the single layer called `name`.
    ///
    /// An already converted layer is left alone. Any other layer kind fails
    /// with [`SparseDetError::UnsupportedLayer`].
    pub fn convert_layer(&mut self, name: &str) -> SparseDetResult<()> {
        let Some((_, layer)) = self
            .model
            .layers_mut()
            .into_iter()
            .find(|(candidate, _)| candidate == name)
        else {
            return Err(SparseDetError::LayerNotFound {
                name: name.to_string(),
            });
        };
        match layer {
            LayerMut::Linear(slot) => match &*slot {
                LinearLayer::Masked(masked) => {
                    let replacement = SparseDenseLinear::from_masked(masked)?;
                    *slot = LinearLayer::SparseDense(replacement);
                    Ok(())
                }
                LinearLayer::SparseDense(_) => Ok(()),
                other => Err(SparseDetError::UnsupportedLayer {
                    name: name.to_string(),
                    kind: other.kind(),
                }),
            },
            LayerMut::Conv(conv) => Err(SparseDetError::UnsupportedLayer {
                name: name.to_string(),
                kind: conv.kind(),
            }),
        }
    }

    /// Moves every sparse-dense layer to sparse storage. Layers already
    /// sparse are skipped; returns how many switched.
    pub fn set_sparse(&mut self) -> SparseDetResult<usize> {
        let _span = trace_span!("set_sparse").entered();
        let mut switched = 0usize;
        for (_, layer) in sparse_convertibles(&mut *self.model) {
            if layer.set_sparse()? {
                switched += 1;
            }
        }
        trace_event!("storage_switched", layers = switched);
        Ok(switched)
    }

    /// Moves every sparse-dense layer to dense storage. Layers already
    /// dense are skipped; returns how many switched.
    pub fn set_dense(&mut self) -> SparseDetResult<usize> {
        let _span = trace_span!("set_dense").entered();
        let mut switched = 0usize;
        for (_, layer) in sparse_convertibles(&mut *self.model) {
            if layer.set_dense()? {
                switched += 1;
            }
        }
        trace_event!("storage_switched", layers = switched);
        Ok(switched)
    }

    pub fn nonzero_report(&self) -> NonzeroReport {
        NonzeroReport::collect(&*self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::layer::{Linear, MaskedConv2d, MaskedLinear};
    use crate::compress::registry::LayerRef;
    use crate::compress::Prunable;
    use crate::kernel::scalar::ConvGeometry;
    use crate::tensor::Matrix;

    struct Toy {
        conv: ConvLayer,
        fc: LinearLayer,
        out: LinearLayer,
    }

    impl ParameterTree for Toy {
        fn layers(&self) -> Vec<(String, LayerRef<'_>)> {
            vec![
                ("conv".to_string(), LayerRef::Conv(&self.conv)),
                ("fc".to_string(), LayerRef::Linear(&self.fc)),
                ("out".to_string(), LayerRef::Linear(&self.out)),
            ]
        }

        fn layers_mut(&mut self) -> Vec<(String, LayerMut<'_>)> {
            vec![
                ("conv".to_string(), LayerMut::Conv(&mut self.conv)),
                ("fc".to_string(), LayerMut::Linear(&mut self.fc)),
                ("out".to_string(), LayerMut::Linear(&mut self.out)),
            ]
        }
    }

    fn toy() -> Toy {
        let geom = ConvGeometry {
            in_channels: 1,
            out_channels: 1,
            kernel: 1,
            stride: 1,
            padding: 0,
        };
        let fc = Matrix::from_vec(vec![0.1, -0.05, 0.3, 0.02], 2, 2).unwrap();
        Toy {
            conv: ConvLayer::Masked(MaskedConv2d::new(vec![0.4], vec![0.0], geom).unwrap()),
            fc: LinearLayer::Masked(MaskedLinear::new(fc, vec![0.0, 0.0]).unwrap()),
            out: LinearLayer::Dense(Linear::zeros(2, 2)),
        }
    }

    fn fc_mask(toy: &Toy) -> Vec<bool> {
        match &toy.fc {
            LinearLayer::Masked(m) => m.param().mask().to_vec(),
            other => panic!("unexpected layer {}", other.kind()),
        }
    }

    #[test]
    fn percentile_pool_spans_all_masked_layers() {
        let mut model = toy();
        let mut ctl = CompressionController::new(&mut model);
        // pool = [0.02, 0.05, 0.1, 0.3, 0.4]; median = 0.1
        let summary = ctl.prune_global_percentile(50.0).unwrap();
        assert_eq!(summary.newly_pruned, 3);
        assert_eq!(summary.thresholds.len(), 2);
        assert_eq!(fc_mask(&model), vec![false, false, true, false]);
    }

    #[test]
    fn zero_percentile_prunes_the_smallest_alive_weight() {
        let mut model = toy();
        let mut ctl = CompressionController::new(&mut model);
        // threshold equals the minimum of the pool and pruning is inclusive
        let summary = ctl.prune_global_percentile(0.0).unwrap();
        assert_eq!(summary.newly_pruned, 1);
        assert_eq!(summary.thresholds[0].1, 0.02);
        assert_eq!(fc_mask(&model), vec![true, true, true, false]);
    }

    #[test]
    fn percentile_out_of_range_is_rejected() {
        let mut model = toy();
        let mut ctl = CompressionController::new(&mut model);
        assert_eq!(
            ctl.prune_global_percentile(101.0),
            Err(SparseDetError::InvalidPercentile(101.0))
        );
        assert!(ctl.prune_global_percentile(f32::NAN).is_err());
    }

    #[test]
    fn empty_pool_prunes_nothing() {
        let mut model = toy();
        let mut ctl = CompressionController::new(&mut model);
        ctl.prune_global_percentile(100.0).unwrap();
        let summary = ctl.prune_global_percentile(0.0).unwrap();
        assert_eq!(summary, PruneSummary::default());
    }

    #[test]
    fn conversion_skips_masked_conv_and_toggles_storage() {
        let mut model = toy();
        let mut ctl = CompressionController::new(&mut model);
        ctl.prune_by_std(0.25).unwrap();
        ctl.bake_all().unwrap();
        assert_eq!(ctl.convert_to_sparse_dense().unwrap(), 1);
        assert_eq!(ctl.set_sparse().unwrap(), 1);
        assert_eq!(ctl.set_sparse().unwrap(), 0);
        assert_eq!(ctl.set_dense().unwrap(), 1);
        assert_eq!(ctl.set_dense().unwrap(), 0);
        assert_eq!(model.fc.kind(), "sparse_dense_linear");
        assert_eq!(model.conv.kind(), "masked_conv2d");
    }

    #[test]
    fn convert_layer_reports_unsupported_and_missing() {
        let mut model = toy();
        let mut ctl = CompressionController::new(&mut model);
        assert_eq!(
            ctl.convert_layer("conv"),
            Err(SparseDetError::UnsupportedLayer {
                name: "conv".to_string(),
                kind: "masked_conv2d",
            })
        );
        assert_eq!(
            ctl.convert_layer("nope"),
            Err(SparseDetError::LayerNotFound {
                name: "nope".to_string(),
            })
        );
        ctl.convert_layer("fc").unwrap();
        ctl.convert_layer("fc").unwrap();
        assert_eq!(model.fc.kind(), "sparse_dense_linear");
    }

    #[test]
    fn report_counts_effective_nonzeros() {
        let mut model = toy();
        let mut ctl = CompressionController::new(&mut model);
        ctl.prune_global_percentile(50.0).unwrap();
        let report = ctl.nonzero_report();
        assert_eq!(report.nonzero(), 2);
        assert_eq!(report.total(), 1 + 4 + 4);
    }
}
