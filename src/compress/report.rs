//! Per-layer nonzero accounting.

use std::fmt;

use crate::compress::registry::ParameterTree;

/// Nonzero weight count of a single layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerNonzeros {
    pub name: String,
    pub kind: &'static str,
    pub nonzero: usize,
    pub total: usize,
}

/// Nonzero weight counts for every layer of a model.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NonzeroReport {
    pub layers: Vec<LayerNonzeros>,
}

impl NonzeroReport {
    pub fn collect<T: ParameterTree + ?Sized>(tree: &T) -> Self {
        let layers = tree
            .layers()
            .into_iter()
            .map(|(name, layer)| {
                let (nonzero, total) = layer.weight_counts();
                LayerNonzeros {
                    name,
                    kind: layer.kind(),
                    nonzero,
                    total,
                }
            })
            .collect();
        Self { layers }
    }

    pub fn nonzero(&self) -> usize {
        self.layers.iter().map(|l| l.nonzero).sum()
    }

    pub fn total(&self) -> usize {
        self.layers.iter().map(|l| l.total).sum()
    }

    /// `total / nonzero`, or `None` when every weight is zero.
    pub fn compression_rate(&self) -> Option<f64> {
        let nonzero = self.nonzero();
        (nonzero > 0).then(|| self.total() as f64 / nonzero as f64)
    }
}

impl fmt::Display for NonzeroReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for layer in &self.layers {
            let pct = if layer.total == 0 {
                0.0
            } else {
                100.0 * layer.nonzero as f64 / layer.total as f64
            };
            writeln!(
                f,
                "{:<28} nonzeros = {:>9} / {:>9} ({:6.2}%) | {}",
                layer.name, layer.nonzero, layer.total, pct, layer.kind
            )?;
        }
        let alive = self.nonzero();
        let total = self.total();
        match self.compression_rate() {
            Some(rate) => write!(
                f,
                "alive: {alive}, pruned: {}, total: {total}, compression rate: {rate:10.2}x",
                total - alive
            ),
            None => write!(f, "alive: 0, pruned: {total}, total: {total}"),
        }
    }
}
