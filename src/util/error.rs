//! Error types for sparsedet.

use thiserror::Error;

/// Result alias for sparsedet operations.
pub type SparseDetResult<T> = std::result::Result<T, SparseDetError>;

/// Errors raised by box coding, compression and inference.
///
/// Numeric edge cases inside decoding are clamped rather than reported; the
/// variants here are either invalid inputs or structural problems with a
/// model's parameters.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SparseDetError {
    /// A reference box has zero or negative height or width.
    #[error("degenerate reference box at index {index}: height {height}, width {width}")]
    DegenerateBox {
        index: usize,
        height: f32,
        width: f32,
    },
    /// A mask and its weight (or a stored tensor and its layer) disagree on shape.
    #[error("shape mismatch in {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// The layer has no registered sparse-dense equivalent.
    #[error("layer `{name}` ({kind}) has no sparse-dense equivalent")]
    UnsupportedLayer { name: String, kind: &'static str },
    /// `to_sparse` was called on a parameter already in sparse storage.
    #[error("parameter is already in sparse storage")]
    AlreadySparse,
    /// `to_dense` was called on a parameter already in dense storage.
    #[error("parameter is already in dense storage")]
    AlreadyDense,
    /// Two parallel inputs have different lengths.
    #[error("length mismatch in {context}: {left} vs {right}")]
    LengthMismatch {
        context: &'static str,
        left: usize,
        right: usize,
    },
    /// An index into a parallel input is past its end.
    #[error("index {index} out of range in {context} (len {len})")]
    IndexOutOfRange {
        context: &'static str,
        index: usize,
        len: usize,
    },
    /// Tensor dimensions are zero or overflow.
    #[error("invalid dimensions: {dims:?}")]
    InvalidDimensions { dims: Vec<usize> },
    /// The provided buffer does not hold enough elements.
    #[error("buffer too small: needed {needed}, got {got}")]
    BufferTooSmall { needed: usize, got: usize },
    /// Percentile outside `[0, 100]`.
    #[error("percentile must lie in [0, 100], got {0}")]
    InvalidPercentile(f32),
    /// Unrecognised threshold preset name.
    #[error("preset must be `visualize` or `evaluate`, got `{0}`")]
    UnknownPreset(String),
    /// No layer with the requested name exists in the parameter tree.
    #[error("no layer named `{name}`")]
    LayerNotFound { name: String },
    /// A checkpoint does not contain a tensor the model needs.
    #[error("checkpoint is missing tensor `{key}`")]
    MissingTensor { key: String },
    /// Image decoding failed.
    #[error("image I/O error: {reason}")]
    ImageIo { reason: String },
}
