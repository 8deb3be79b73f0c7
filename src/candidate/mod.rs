//! Candidate selection and suppression.
//!
//! Includes Top-K capping and per-class IoU non-maximum suppression.

pub(crate) mod nms;
pub(crate) mod topk;
