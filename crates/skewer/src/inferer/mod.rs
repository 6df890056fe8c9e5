//! # Inferers
//!
//! An [`Inferer`] owns a model: it is initialized with a path, a device and
//! arguments, loads its artifacts once, and then turns named input tensors
//! into named output tensors. Inferers that set
//! [`Inferer::supports_messages`] can also serve wire messages directly,
//! without a converter, which is how streaming generation is done.
//!
//! Built-in inferers:
//!
//! - [`SumInferer`] (`sum`) - adds two inputs
//! - [`RnnGenerator`] (`rnn_generator`) - word-level sampling from a recurrent step model

mod core_trait;
mod generation;
mod step_model;
mod sum;
mod vocabulary;

pub use core_trait::Inferer;
pub use generation::RnnGenerator;
pub use step_model::{StepModel, TransitionModel};
pub use sum::SumInferer;
pub use vocabulary::Vocabulary;
