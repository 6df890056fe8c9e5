//! # Tensor Backend
//!
//! This module provides a unified interface for the tensor types the batch
//! helpers work with, so that stacking a batch along its leading dimension and
//! splitting it back into per-item rows reads the same for every engine.
//!
//! ## Feature Flags
//!
//! - `candle`: Enables support for the Candle tensor library
//!
//! [`DenseArray`](crate::tensor::DenseArray) always implements [`Backend`].

mod core_trait;

#[cfg_attr(docsrs, doc(cfg(feature = "candle")))]
#[cfg(feature = "candle")]
/// Candle tensor backend implementation.
///
/// This module is only available when the `candle` feature flag is enabled.
/// It provides an implementation of [`Backend`] for Candle's `Tensor` type and
/// lets a Candle tensor travel through the pipeline as an engine buffer.
pub mod candle;

// Re-export the core traits for convenient imports
pub use core_trait::*;
