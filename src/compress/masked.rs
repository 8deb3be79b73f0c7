//! Weight tensors gated by a boolean keep-mask.
//!
//! The stored weight may stay nonzero where the mask is cleared until
//! [`MaskedParameter::bake`] runs; every computation goes through
//! [`MaskedParameter::effective_weight`], so a cleared entry always
//! contributes exactly zero.

use crate::util::{SparseDetError, SparseDetResult};

/// A dense weight tensor with a same-shaped keep-mask.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskedParameter {
    weight: Vec<f32>,
    weight_shape: Vec<usize>,
    mask: Vec<bool>,
    mask_shape: Vec<usize>,
}

fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

impl MaskedParameter {
    /// Wraps `weight` with an all-true mask.
    pub fn new(weight: Vec<f32>, shape: Vec<usize>) -> SparseDetResult<Self> {
        let mask = vec![true; weight.len()];
        Self::from_parts(weight, shape, mask)
    }

    /// Zero weight of the given shape with an all-true mask.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = element_count(&shape);
        Self {
            weight: vec![0.0; len],
            weight_shape: shape.clone(),
            mask: vec![true; len],
            mask_shape: shape,
        }
    }

    /// Rebuilds a parameter from stored weight and mask buffers.
    pub fn from_parts(weight: Vec<f32>, shape: Vec<usize>, mask: Vec<bool>) -> SparseDetResult<Self> {
        let needed = element_count(&shape);
        if weight.len() != needed {
            return Err(SparseDetError::ShapeMismatch {
                context: "masked weight".to_string(),
                expected: shape,
                got: vec![weight.len()],
            });
        }
        if mask.len() != needed {
            return Err(SparseDetError::ShapeMismatch {
                context: "masked mask".to_string(),
                expected: shape,
                got: vec![mask.len()],
            });
        }
        Ok(Self {
            weight,
            mask_shape: shape.clone(),
            weight_shape: shape,
            mask,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.weight_shape
    }

    pub fn len(&self) -> usize {
        self.weight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weight.is_empty()
    }

    /// Stored weight values, possibly nonzero where masked until baked.
    pub fn weight(&self) -> &[f32] {
        &self.weight
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    fn check_shapes(&self) -> SparseDetResult<()> {
        if self.mask_shape != self.weight_shape || self.mask.len() != self.weight.len() {
            return Err(SparseDetError::ShapeMismatch {
                context: "mask vs weight".to_string(),
                expected: self.weight_shape.clone(),
                got: self.mask_shape.clone(),
            });
        }
        Ok(())
    }

    /// `weight * mask`, the values every forward pass uses.
    pub fn effective_weight(&self) -> Vec<f32> {
        self.weight
            .iter()
            .zip(&self.mask)
            .map(|(&w, &keep)| if keep { w } else { 0.0 })
            .collect()
    }

    /// Absolute values of the entries that are still alive (kept and nonzero).
    pub fn alive_magnitudes(&self) -> impl Iterator<Item = f32> + '_ {
        self.weight
            .iter()
            .zip(&self.mask)
            .filter(|&(&w, &keep)| keep && w != 0.0)
            .map(|(&w, _)| w.abs())
    }

    /// Clears the mask wherever `|weight|` falls below `threshold`.
    ///
    /// A magnitude equal to the threshold counts as below it, so a weight of
    /// `-0.05` is pruned at threshold `0.05`. Entries already pruned stay
    /// pruned. Returns how many entries this call newly pruned.
    pub fn prune(&mut self, threshold: f32) -> SparseDetResult<usize> {
        self.check_shapes()?;
        let mut newly = 0usize;
        for (keep, &w) in self.mask.iter_mut().zip(&self.weight) {
            if *keep && w.abs() <= threshold {
                *keep = false;
                newly += 1;
            }
        }
        Ok(newly)
    }

    /// Writes `weight * mask` back into the stored weight.
    pub fn bake(&mut self) -> SparseDetResult<()> {
        self.check_shapes()?;
        for (w, &keep) in self.weight.iter_mut().zip(&self.mask) {
            if !keep {
                *w = 0.0;
            }
        }
        Ok(())
    }

    /// Entries with a nonzero effective weight.
    pub fn nonzero_count(&self) -> usize {
        self.alive_magnitudes().count()
    }
}

#[cfg(test)]
mod tests {
    use super::MaskedParameter;
    use crate::util::SparseDetError;

    #[test]
    fn prune_clears_small_magnitudes() {
        let mut p = MaskedParameter::new(vec![0.1, -0.05, 0.3, 0.02], vec![4]).unwrap();
        assert_eq!(p.prune(0.05).unwrap(), 2);
        assert_eq!(p.mask(), &[true, false, true, false]);
        let mut q = MaskedParameter::new(vec![0.1, -0.05, 0.3, 0.02], vec![4]).unwrap();
        q.prune(0.049).unwrap();
        assert_eq!(q.mask(), &[true, true, true, false]);
    }

    #[test]
    fn prune_never_restores_entries() {
        let mut p = MaskedParameter::new(vec![0.1, -0.05, 0.3, 0.02], vec![2, 2]).unwrap();
        p.prune(0.2).unwrap();
        assert_eq!(p.prune(0.0).unwrap(), 0);
        assert_eq!(p.mask(), &[false, false, true, false]);
    }

    #[test]
    fn unbaked_weights_are_inert() {
        let mut p = MaskedParameter::new(vec![1.0, 2.0], vec![2]).unwrap();
        p.prune(1.5).unwrap();
        assert_eq!(p.weight(), &[1.0, 2.0]);
        assert_eq!(p.effective_weight(), vec![0.0, 2.0]);
        p.bake().unwrap();
        assert_eq!(p.weight(), &[0.0, 2.0]);
        assert_eq!(p.nonzero_count(), 1);
    }

    #[test]
    fn diverged_mask_shape_is_fatal() {
        let mut p = MaskedParameter::new(vec![1.0; 6], vec![2, 3]).unwrap();
        p.mask_shape = vec![3, 2];
        let err = p.prune(0.5).unwrap_err();
        assert_eq!(
            err,
            SparseDetError::ShapeMismatch {
                context: "mask vs weight".to_string(),
                expected: vec![2, 3],
                got: vec![3, 2],
            }
        );
        assert!(p.bake().is_err());
    }

    #[test]
    fn from_parts_validates_lengths() {
        let err = MaskedParameter::from_parts(vec![1.0; 4], vec![2, 2], vec![true; 3]).unwrap_err();
        assert!(matches!(err, SparseDetError::ShapeMismatch { .. }));
    }
}
