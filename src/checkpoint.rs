//! Named tensor snapshots of a model's layers.
//!
//! Every layer `name` contributes `name.weight` and `name.bias`; masked
//! layers also contribute `name.mask`, stored as `0.0` / `1.0`. Sparse-dense
//! layers export their logical dense matrix regardless of the live storage
//! and keep their storage state when loaded.

use std::collections::BTreeMap;

use crate::compress::layer::{Conv2d, ConvLayer, Linear, LinearLayer};
use crate::compress::registry::{LayerMut, LayerRef, ParameterTree};
use crate::compress::{MaskedParameter, Prunable, SparseConvertible};
use crate::tensor::Matrix;
use crate::trace::{trace_event, trace_span};
use crate::util::{SparseDetError, SparseDetResult};

/// A flat tensor with its shape.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorRecord {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorRecord {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> SparseDetResult<Self> {
        let record = Self { shape, data };
        record.check_len()?;
        Ok(record)
    }

    fn check_len(&self) -> SparseDetResult<()> {
        if self.shape.iter().product::<usize>() != self.data.len() {
            return Err(SparseDetError::ShapeMismatch {
                context: "tensor record".to_string(),
                expected: self.shape.clone(),
                got: vec![self.data.len()],
            });
        }
        Ok(())
    }
}

/// Tensors keyed by `<layer>.<weight|bias|mask>`.
pub type StateDict = BTreeMap<String, TensorRecord>;

fn record(shape: Vec<usize>, data: Vec<f32>) -> TensorRecord {
    TensorRecord { shape, data }
}

fn mask_record(param: &MaskedParameter) -> TensorRecord {
    let data = param
        .mask()
        .iter()
        .map(|&keep| if keep { 1.0 } else { 0.0 })
        .collect();
    record(param.shape().to_vec(), data)
}

/// Snapshots every layer of `tree`.
pub fn export_state<T: ParameterTree + ?Sized>(tree: &T) -> StateDict {
    let mut state = StateDict::new();
    for (name, layer) in tree.layers() {
        let (weight, bias, mask) = match layer {
            LayerRef::Linear(LinearLayer::Dense(l)) => (
                record(l.weight().shape().to_vec(), l.weight().as_slice().to_vec()),
                l.bias().to_vec(),
                None,
            ),
            LayerRef::Linear(LinearLayer::Masked(l)) => (
                record(l.param().shape().to_vec(), l.param().weight().to_vec()),
                l.bias().to_vec(),
                Some(mask_record(l.param())),
            ),
            LayerRef::Linear(LinearLayer::SparseDense(l)) => {
                let dense = SparseConvertible::param(l).logical_matrix();
                (
                    record(dense.shape().to_vec(), dense.into_vec()),
                    l.bias().to_vec(),
                    None,
                )
            }
            LayerRef::Conv(ConvLayer::Dense(c)) => (
                record(c.geometry().weight_shape(), c.weight().to_vec()),
                c.bias().to_vec(),
                None,
            ),
            LayerRef::Conv(ConvLayer::Masked(c)) => (
                record(c.param().shape().to_vec(), c.param().weight().to_vec()),
                c.bias().to_vec(),
                Some(mask_record(c.param())),
            ),
        };
        state.insert(format!("{name}.bias"), record(vec![bias.len()], bias));
        state.insert(format!("{name}.weight"), weight);
        if let Some(mask) = mask {
            state.insert(format!("{name}.mask"), mask);
        }
    }
    state
}

fn fetch<'s>(state: &'s StateDict, key: String) -> SparseDetResult<&'s TensorRecord> {
    let Some(rec) = state.get(&key) else {
        return Err(SparseDetError::MissingTensor { key });
    };
    rec.check_len()?;
    Ok(rec)
}

fn expect_shape(key: &str, rec: &TensorRecord, expected: &[usize]) -> SparseDetResult<()> {
    if rec.shape != expected {
        return Err(SparseDetError::ShapeMismatch {
            context: key.to_string(),
            expected: expected.to_vec(),
            got: rec.shape.clone(),
        });
    }
    Ok(())
}

struct LayerTensors {
    weight: Vec<f32>,
    bias: Vec<f32>,
    mask: Option<Vec<bool>>,
}

fn fetch_layer(
    state: &StateDict,
    name: &str,
    weight_shape: &[usize],
    masked: bool,
) -> SparseDetResult<LayerTensors> {
    let weight_key = format!("{name}.weight");
    let weight = fetch(state, weight_key.clone())?;
    expect_shape(&weight_key, weight, weight_shape)?;
    let bias_key = format!("{name}.bias");
    let bias = fetch(state, bias_key.clone())?;
    expect_shape(&bias_key, bias, &weight_shape[..1])?;
    let mask = if masked {
        let mask_key = format!("{name}.mask");
        let mask = fetch(state, mask_key.clone())?;
        expect_shape(&mask_key, mask, weight_shape)?;
        Some(mask.data.iter().map(|&v| v != 0.0).collect())
    } else {
        None
    };
    Ok(LayerTensors {
        weight: weight.data.clone(),
        bias: bias.data.clone(),
        mask,
    })
}

/// Loads tensors from `state` into every layer of `tree`.
///
/// Keys for layers `tree` does not have are ignored. A layer whose tensors
/// are missing or have the wrong shape fails the whole load; layers visited
/// before the failure keep their new values.
pub fn load_state<T: ParameterTree + ?Sized>(tree: &mut T, state: &StateDict) -> SparseDetResult<()> {
    let _span = trace_span!("load_state", tensors = state.len()).entered();
    let mut loaded = 0usize;
    for (name, layer) in tree.layers_mut() {
        match layer {
            LayerMut::Linear(slot) => {
                let (out_features, in_features) = slot.dims();
                let shape = [out_features, in_features];
                match slot {
                    LinearLayer::Dense(l) => {
                        let t = fetch_layer(state, &name, &shape, false)?;
                        let weight = Matrix::from_vec(t.weight, out_features, in_features)?;
                        *l = Linear::new(weight, t.bias)?;
                    }
                    LinearLayer::Masked(l) => {
                        let t = fetch_layer(state, &name, &shape, true)?;
                        let mask = t.mask.unwrap_or_else(|| vec![true; t.weight.len()]);
                        l.set_param(MaskedParameter::from_parts(t.weight, shape.to_vec(), mask)?)?;
                        l.set_bias(t.bias)?;
                    }
                    LinearLayer::SparseDense(l) => {
                        let t = fetch_layer(state, &name, &shape, false)?;
                        l.set_weight(Matrix::from_vec(t.weight, out_features, in_features)?)?;
                        l.set_bias(t.bias)?;
                    }
                }
            }
            LayerMut::Conv(slot) => {
                let geom = slot.geometry();
                let shape = geom.weight_shape();
                match slot {
                    ConvLayer::Dense(c) => {
                        let t = fetch_layer(state, &name, &shape, false)?;
                        *c = Conv2d::new(t.weight, t.bias, geom)?;
                    }
                    ConvLayer::Masked(c) => {
                        let t = fetch_layer(state, &name, &shape, true)?;
                        let mask = t.mask.unwrap_or_else(|| vec![true; t.weight.len()]);
                        c.set_param(MaskedParameter::from_parts(t.weight, shape, mask)?)?;
                        c.set_bias(t.bias)?;
                    }
                }
            }
        }
        loaded += 1;
    }
    trace_event!("state_loaded", layers = loaded);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::layer::{MaskedLinear, SparseDenseLinear};

    struct One {
        fc: LinearLayer,
    }

    impl ParameterTree for One {
        fn layers(&self) -> Vec<(String, LayerRef<'_>)> {
            vec![("fc".to_string(), LayerRef::Linear(&self.fc))]
        }

        fn layers_mut(&mut self) -> Vec<(String, LayerMut<'_>)> {
            vec![("fc".to_string(), LayerMut::Linear(&mut self.fc))]
        }
    }

    fn masked() -> One {
        let w = Matrix::from_vec(vec![0.1, -0.05, 0.3, 0.02], 2, 2).unwrap();
        let mut layer = MaskedLinear::new(w, vec![1.0, 2.0]).unwrap();
        layer.prune(0.05).unwrap();
        One {
            fc: LinearLayer::Masked(layer),
        }
    }

    #[test]
    fn masked_layer_exports_mask_as_floats() {
        let state = export_state(&masked());
        assert_eq!(state["fc.mask"].data, vec![1.0, 0.0, 1.0, 0.0]);
        assert_eq!(state["fc.weight"].shape, vec![2, 2]);
        assert_eq!(state["fc.bias"].data, vec![1.0, 2.0]);

        let mut fresh = One {
            fc: LinearLayer::Masked(MaskedLinear::zeros(2, 2)),
        };
        load_state(&mut fresh, &state).unwrap();
        assert_eq!(export_state(&fresh), state);
    }

    #[test]
    fn missing_and_misshaped_tensors_fail() {
        let mut state = export_state(&masked());
        state.remove("fc.mask");
        let mut target = masked();
        assert_eq!(
            load_state(&mut target, &state),
            Err(SparseDetError::MissingTensor {
                key: "fc.mask".to_string()
            })
        );

        let mut bad = One {
            fc: LinearLayer::Dense(Linear::zeros(3, 2)),
        };
        let err = load_state(&mut bad, &export_state(&masked())).unwrap_err();
        assert!(matches!(err, SparseDetError::ShapeMismatch { .. }));
    }

    #[test]
    fn sparse_layer_keeps_storage_on_load() {
        let w = Matrix::from_vec(vec![0.0, 1.0, 2.0, 0.0], 2, 2).unwrap();
        let mut sd = SparseDenseLinear::new(w, vec![0.0, 0.0]).unwrap();
        sd.set_sparse().unwrap();
        let mut model = One {
            fc: LinearLayer::SparseDense(sd),
        };
        let state = export_state(&model);
        assert_eq!(state["fc.weight"].data, vec![0.0, 1.0, 2.0, 0.0]);
        load_state(&mut model, &state).unwrap();
        match &model.fc {
            LinearLayer::SparseDense(l) => assert!(SparseConvertible::param(l).is_sparse()),
            other => panic!("unexpected layer {}", other.kind()),
        }
    }
}
