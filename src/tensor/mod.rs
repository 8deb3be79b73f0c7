//! Owned dense tensors used across the pipeline.
//!
//! `Matrix` is a row-major 2D buffer (RoI batches, linear weights, head
//! outputs). `Tensor3` is a channel-major `C x H x W` buffer for images and
//! feature maps. Both validate their element count on construction.

use crate::util::{SparseDetError, SparseDetResult};

/// Height and width of an image in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageSize {
    pub height: f32,
    pub width: f32,
}

impl ImageSize {
    pub fn new(height: f32, width: f32) -> Self {
        Self { height, width }
    }
}

/// Row-major dense matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    data: Vec<f32>,
    rows: usize,
    cols: usize,
}

impl Matrix {
    /// Wraps a row-major buffer of exactly `rows * cols` elements.
    pub fn from_vec(data: Vec<f32>, rows: usize, cols: usize) -> SparseDetResult<Self> {
        let needed = rows
            .checked_mul(cols)
            .ok_or(SparseDetError::InvalidDimensions {
                dims: vec![rows, cols],
            })?;
        if data.len() != needed {
            return Err(SparseDetError::ShapeMismatch {
                context: "matrix buffer".to_string(),
                expected: vec![needed],
                got: vec![data.len()],
            });
        }
        Ok(Self { data, rows, cols })
    }

    /// Zero-filled matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Shape as `[rows, cols]`.
    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Returns row `r`, or `None` when out of range.
    pub fn row(&self, r: usize) -> Option<&[f32]> {
        if r >= self.rows {
            return None;
        }
        let start = r * self.cols;
        self.data.get(start..start + self.cols)
    }

    pub fn get(&self, r: usize, c: usize) -> Option<f32> {
        if c >= self.cols {
            return None;
        }
        self.row(r).map(|row| row[c])
    }

    /// Applies `max(x, 0)` element-wise.
    pub fn relu_in_place(&mut self) {
        for value in &mut self.data {
            *value = value.max(0.0);
        }
    }
}

/// Channel-major `C x H x W` tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor3 {
    data: Vec<f32>,
    channels: usize,
    height: usize,
    width: usize,
}

impl Tensor3 {
    /// Wraps a `C x H x W` buffer; every dimension must be non-zero.
    pub fn from_vec(
        data: Vec<f32>,
        channels: usize,
        height: usize,
        width: usize,
    ) -> SparseDetResult<Self> {
        if channels == 0 || height == 0 || width == 0 {
            return Err(SparseDetError::InvalidDimensions {
                dims: vec![channels, height, width],
            });
        }
        let needed = channels
            .checked_mul(height)
            .and_then(|v| v.checked_mul(width))
            .ok_or(SparseDetError::InvalidDimensions {
                dims: vec![channels, height, width],
            })?;
        if data.len() < needed {
            return Err(SparseDetError::BufferTooSmall {
                needed,
                got: data.len(),
            });
        }
        if data.len() > needed {
            return Err(SparseDetError::ShapeMismatch {
                context: "tensor buffer".to_string(),
                expected: vec![needed],
                got: vec![data.len()],
            });
        }
        Ok(Self {
            data,
            channels,
            height,
            width,
        })
    }

    pub fn zeros(channels: usize, height: usize, width: usize) -> Self {
        Self {
            data: vec![0.0; channels * height * width],
            channels,
            height,
            width,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Image size of the spatial plane.
    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.height as f32, self.width as f32)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Returns the `H x W` plane of channel `c`.
    pub fn plane(&self, c: usize) -> Option<&[f32]> {
        if c >= self.channels {
            return None;
        }
        let len = self.height * self.width;
        self.data.get(c * len..(c + 1) * len)
    }

    #[inline]
    pub fn at(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[(c * self.height + y) * self.width + x]
    }

    pub fn relu_in_place(&mut self) {
        for value in &mut self.data {
            *value = value.max(0.0);
        }
    }
}
