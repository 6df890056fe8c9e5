use std::fmt::Debug;
use std::path::Path;
use async_trait::async_trait;
use serde::Deserialize;
use crate::error::{PipelineError, Result};
use crate::tensor::{DenseArray, NamedTensorList, TensorHandle};

/// Name of the token window input, i64 `[2]`.
pub const STEP_INPUT: &str = "input";
/// Name of the recurrent state, f32 `[1, 1, H]`, on both sides of a step.
pub const STEP_HIDDEN: &str = "hidden";
/// Name of the next-token scores, f32 `[1, V]`.
pub const STEP_OUTPUT: &str = "output";

/// One step of a recurrent language model.
///
/// Takes `input` and `hidden`, returns `output` and the next `hidden`.
#[async_trait]
pub trait StepModel: Debug + Send + Sync {
    fn hidden_size(&self) -> usize;

    fn vocab_size(&self) -> usize;

    async fn step(&self, inputs: NamedTensorList) -> Result<NamedTensorList>;
}

#[derive(Debug, Deserialize)]
struct TransitionFile {
    hidden_size: usize,
    logits: Vec<Vec<f32>>,
}

/// A first-order model: the scores of the next token are a fixed row per
/// last input token. The hidden state is passed through unchanged.
///
/// Stored as JSON: `{"hidden_size": H, "logits": [[f32; V]; V]}`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionModel {
    hidden_size: usize,
    logits: Vec<Vec<f32>>,
}

impl TransitionModel {
    pub fn new(hidden_size: usize, logits: Vec<Vec<f32>>) -> Result<Self> {
        let vocab = logits.len();
        if vocab == 0 {
            return Err(PipelineError::load("transition model has no rows"));
        }
        if let Some((row, values)) = logits.iter().enumerate().find(|(_, values)| values.len() != vocab) {
            return Err(PipelineError::load(format!(
                "transition row {} has {} scores, expected {}", row, values.len(), vocab
            )));
        }
        Ok(Self { hidden_size, logits })
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read(path).await.map_err(|err| {
            PipelineError::load(format!("Failed to read model {}: {}", path.display(), err))
        })?;
        let file: TransitionFile = serde_json::from_slice(&contents).map_err(|err| {
            PipelineError::load(format!("Failed to parse model {}: {}", path.display(), err))
        })?;
        Self::new(file.hidden_size, file.logits)
    }

    /// Overrides the hidden size stored with the model.
    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }
}

#[async_trait]
impl StepModel for TransitionModel {
    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn vocab_size(&self) -> usize {
        self.logits.len()
    }

    async fn step(&self, inputs: NamedTensorList) -> Result<NamedTensorList> {
        let window = required(&inputs, STEP_INPUT)?;
        let hidden = required(&inputs, STEP_HIDDEN)?;

        let last = window
            .as_i64()
            .and_then(|ids| ids.last().copied())
            .ok_or_else(|| PipelineError::infer("`input` must be a non-empty i64 tensor"))?;
        if hidden.shape() != [1, 1, self.hidden_size] {
            return Err(PipelineError::infer(format!(
                "`hidden` has shape {:?}, expected [1, 1, {}]", hidden.shape(), self.hidden_size
            )));
        }
        let row = usize::try_from(last)
            .ok()
            .and_then(|idx| self.logits.get(idx))
            .ok_or_else(|| PipelineError::infer(format!("token {} is outside the model vocabulary", last)))?;

        let output = DenseArray::from_f32(vec![1, row.len()], row.clone()).map_err(PipelineError::infer)?;
        Ok(NamedTensorList::new()
            .with(TensorHandle::dense(STEP_OUTPUT, output))
            .with(TensorHandle::dense(STEP_HIDDEN, hidden)))
    }
}

pub(crate) fn required(inputs: &NamedTensorList, name: &str) -> Result<DenseArray> {
    inputs
        .get(name)
        .ok_or_else(|| PipelineError::infer(format!("missing input `{}`", name)))?
        .payload()
        .to_dense()
        .map_err(PipelineError::infer)
}
