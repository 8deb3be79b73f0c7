//! SparseDet is a CPU-first two-stage object detector with online model
//! compression.
//!
//! Detection decodes per-class box offsets, thresholds class probabilities
//! and suppresses overlapping boxes per class. Compression prunes masked
//! layers by magnitude, bakes the masks into the weights and converts linear
//! layers to switchable dense/sparse storage, all on a live model. Parallel
//! prediction is available via the `rayon` feature and SIMD dense kernels via
//! `simd`.

pub mod bbox;
mod candidate;
pub mod checkpoint;
pub mod compress;
pub mod detector;
#[cfg(feature = "image-io")]
pub mod io;
pub mod kernel;
pub mod model;
pub mod tensor;
mod trace;
pub mod util;

pub use bbox::codec::{decode, encode, LocNormalization, MAX_CENTER_OFFSET, MAX_LOG_SCALE};
pub use bbox::{BBox, Delta};
pub use candidate::nms::{suppress, suppress_subset};
pub use candidate::topk::cap_candidates;
pub use checkpoint::{export_state, load_state, StateDict, TensorRecord};
pub use compress::{
    CompressionController, LayerNonzeros, MaskedParameter, NonzeroReport, ParameterTree,
    Prunable, PruneSummary, PruningPolicy, SparseConvertible, SparseDenseParameter,
};
pub use detector::{
    DetectionHead, Detections, Detector, DetectorConfig, FeatureExtractor, HeadOutput, Mode,
    Preset, ProposalGenerator, Proposals,
};
pub use model::{ArchConfig, ConvItem};
pub use tensor::{ImageSize, Matrix, Tensor3};
pub use util::{SparseDetError, SparseDetResult};
