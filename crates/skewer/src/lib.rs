//! # Skewer
//!
//! A converter / inferer plugin pipeline for model serving: the contract
//! between wire messages and model tensors, plus the plugins and an
//! in-process driver that exercise it.
//!
//! ## Overview
//!
//! A serving host calls into a pipeline at fixed extension points:
//!
//! - [`Converter::init`], [`Inferer::init`] and [`Inferer::load`] once at startup
//! - [`Converter::preprocess`] / [`Converter::batch_preprocess`] to turn requests into tensors
//! - [`Inferer::infer`] / [`Inferer::batch_infer`] to run the model
//! - [`Converter::postprocess`] / [`Converter::batch_postprocess`] to turn tensors into responses
//! - [`Inferer::infer_message`] for pipelines without a converter, including streaming ones
//!
//! Every call carries a [`RequestContext`]: the request, the first error a
//! stage raised, one typed user-data slot and, for streaming calls, the sink
//! for partial responses and a cooperative disconnect flag.
//!
//! ## Architecture
//!
//! ### Assumptions
//! Regardless of backend used, skewer reserves two dimensions with special meanings:
//!  - The `0th` dimension is reserved as the batch dimension
//!  - The `1st` dimension is reserved as the sequence dimension
//!  - Tensors may fill in other dimensions
//!
//! ### Tensors
//!
//! A [`TensorHandle`] is a named [`TensorPayload`]: a scalar, a dense
//! `f32` / `i64` array, or an opaque engine-owned buffer. Batching helpers
//! stack per-request tensors along the batch dimension and split batched
//! outputs back, through the [`Backend`](backend::Backend) trait.
//!
//! ### Errors
//!
//! [`PipelineError`] classifies every failure. Startup kinds are fatal;
//! per-request kinds become a well-formed error response whose status the
//! error decides.
//!
//! ## Features
//!
//! - **candle** - Enables candle tensors as engine buffers and as a backend
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use skewer::{Pipeline, PipelineConfig, Registry, WireMessage};
//!
//! let config = PipelineConfig::from_file("pipeline.toml")?;
//! let pipeline = Pipeline::build(&Registry::with_builtins(), &config).await?;
//!
//! let request = WireMessage::text(r#"{"a":1.0,"b":2.0}"#).with_content_type("application/json");
//! let response = pipeline.handle(Arc::new(request)).await;
//! assert_eq!(response.as_text(), Some(r#"{"c":3.0}"#));
//! ```

mod communication;
mod config;
mod context;
mod error;
mod logging;
mod message;
mod pipeline;
mod registry;
mod tensor;

pub mod backend;
pub mod converter;
pub mod inferer;

/// Constants for client reference
pub use tensor::constant;

pub use communication::{ChannelSink, ItemStream, StreamSink, chunk_channel};
pub use config::{ConverterConfig, Device, InfererConfig, PipelineConfig, PluginArgs};
pub use context::{Disconnect, DisconnectHandle, RequestContext, UserData};
pub use converter::Converter;
pub use error::{ErrorKind, PipelineError, Result};
pub use inferer::Inferer;
pub use logging::init_logging;
pub use message::{APPLICATION_JSON, OCTET_STREAM, Payload, Status, TEXT_PLAIN, WireMessage};
pub use pipeline::{Pipeline, StreamingSession};
pub use registry::Registry;
pub use tensor::{
    ArrayData, DenseArray, EngineBuffer, EngineTensor, NamedTensorList, TensorError, TensorHandle, TensorPayload,
};
