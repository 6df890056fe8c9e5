//! # Converters
//!
//! A [`Converter`] sits on both sides of an inferer: `preprocess` turns a
//! wire message into named tensors, `postprocess` turns the inferer's named
//! tensors back into a wire message. Batch variants operate on groups of
//! requests with positionally aligned contexts.
//!
//! Built-in converters:
//!
//! - [`JsonFieldsConverter`] (`json_fields`) - numeric JSON fields to scalars and back
//! - [`ImageClassifierConverter`] (`image_classifier`) - encoded images to `[N, 3, S, S]`, scores to labels
//! - [`MaskedLmConverter`] (`masked_lm`) - text to token ids, predictions at `[MASK]` positions to tokens

mod core_trait;
mod decode;
mod image_classifier;
mod json_fields;
mod labels;
mod masked_lm;

pub use core_trait::Converter;
pub(crate) use core_trait::item_error_response;
pub use decode::{DecodeFailurePolicy, DecodePool, ImageDecoder, ItemDecoder};
pub use image_classifier::ImageClassifierConverter;
pub use json_fields::JsonFieldsConverter;
pub use labels::LabelTable;
pub use masked_lm::{MaskPositions, MaskedLmConverter};
