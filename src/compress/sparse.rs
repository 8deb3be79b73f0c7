//! Dense/sparse switchable weight storage.
//!
//! A [`SparseDenseParameter`] holds one logical 2D matrix in exactly one of
//! two encodings, modelled as the [`Storage`] tagged union so only the live
//! representation exists in memory. The sparse encoding is a coordinate
//! list of the nonzero entries in row-major order.

use crate::kernel::sparse::coo_linear;
use crate::kernel::{DenseLinear, LinearKernel};
use crate::tensor::Matrix;
use crate::util::{SparseDetError, SparseDetResult};

/// Coordinate-list (COO) sparse matrix.
///
/// For the 2x3 matrix
/// ```text
/// [0.0  1.5  0.0]
/// [2.0  0.0  3.0]
/// ```
/// the entries are `(0, 1, 1.5)`, `(1, 0, 2.0)`, `(1, 2, 3.0)`.
#[derive(Clone, Debug, PartialEq)]
pub struct CooMatrix {
    /// Row index of each stored value.
    pub row_indices: Vec<usize>,
    /// Column index of each stored value.
    pub col_indices: Vec<usize>,
    /// Stored nonzero values.
    pub values: Vec<f32>,
    /// Logical shape `(rows, cols)`.
    pub shape: (usize, usize),
}

impl CooMatrix {
    /// Collects the nonzero entries of `dense` in row-major order.
    pub fn from_dense(dense: &Matrix) -> Self {
        let (rows, cols) = (dense.rows(), dense.cols());
        let mut row_indices = Vec::new();
        let mut col_indices = Vec::new();
        let mut values = Vec::new();
        for (idx, &value) in dense.as_slice().iter().enumerate() {
            if value != 0.0 {
                row_indices.push(idx / cols);
                col_indices.push(idx % cols);
                values.push(value);
            }
        }
        Self {
            row_indices,
            col_indices,
            values,
            shape: (rows, cols),
        }
    }

    /// Scatters the entries into a zero-filled dense matrix.
    pub fn to_dense(&self) -> Matrix {
        let (rows, cols) = self.shape;
        let mut dense = Matrix::zeros(rows, cols);
        let data = dense.as_mut_slice();
        for ((&r, &c), &v) in self
            .row_indices
            .iter()
            .zip(&self.col_indices)
            .zip(&self.values)
        {
            data[r * cols + c] = v;
        }
        dense
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Iterates `(row, col, value)` triplets.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        self.row_indices
            .iter()
            .zip(&self.col_indices)
            .zip(&self.values)
            .map(|((&r, &c), &v)| (r, c, v))
    }
}

/// The live encoding of a [`SparseDenseParameter`].
#[derive(Clone, Debug, PartialEq)]
pub enum Storage {
    Dense(Matrix),
    Sparse(CooMatrix),
}

/// A 2D weight that can switch between dense and sparse storage.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseDenseParameter {
    storage: Storage,
}

impl SparseDenseParameter {
    /// Starts in dense storage.
    pub fn dense(matrix: Matrix) -> Self {
        Self {
            storage: Storage::Dense(matrix),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.storage, Storage::Sparse(_))
    }

    /// Logical shape `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        match &self.storage {
            Storage::Dense(m) => (m.rows(), m.cols()),
            Storage::Sparse(coo) => coo.shape,
        }
    }

    /// Number of nonzero logical entries.
    pub fn nnz(&self) -> usize {
        match &self.storage {
            Storage::Dense(m) => m.as_slice().iter().filter(|&&v| v != 0.0).count(),
            Storage::Sparse(coo) => coo.nnz(),
        }
    }

    /// Bytes held by the live representation's buffers.
    pub fn stored_bytes(&self) -> usize {
        match &self.storage {
            Storage::Dense(m) => m.as_slice().len() * std::mem::size_of::<f32>(),
            Storage::Sparse(coo) => {
                coo.nnz() * (2 * std::mem::size_of::<usize>() + std::mem::size_of::<f32>())
            }
        }
    }

    /// Dense copy of the logical matrix; the storage state is unchanged.
    pub fn logical_matrix(&self) -> Matrix {
        match &self.storage {
            Storage::Dense(m) => m.clone(),
            Storage::Sparse(coo) => coo.to_dense(),
        }
    }

    /// Switches to sparse storage, dropping the dense buffer.
    pub fn to_sparse(&mut self) -> SparseDetResult<()> {
        let coo = match &self.storage {
            Storage::Sparse(_) => return Err(SparseDetError::AlreadySparse),
            Storage::Dense(m) => CooMatrix::from_dense(m),
        };
        self.storage = Storage::Sparse(coo);
        Ok(())
    }

    /// Switches to dense storage, dropping the coordinate list.
    pub fn to_dense(&mut self) -> SparseDetResult<()> {
        let dense = match &self.storage {
            Storage::Dense(_) => return Err(SparseDetError::AlreadyDense),
            Storage::Sparse(coo) => coo.to_dense(),
        };
        self.storage = Storage::Dense(dense);
        Ok(())
    }

    /// Computes `input * W^T + bias` with whichever storage is live.
    pub fn forward(&self, input: &Matrix, bias: Option<&[f32]>) -> SparseDetResult<Matrix> {
        match &self.storage {
            Storage::Dense(m) => DenseLinear::linear(input, m.as_slice(), m.rows(), bias),
            Storage::Sparse(coo) => coo_linear(input, coo, bias),
        }
    }
}
