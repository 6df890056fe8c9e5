use std::path::{Path, PathBuf};
use async_trait::async_trait;
use tracing::{debug, info};
use crate::config::{Device, PluginArgs};
use crate::context::RequestContext;
use crate::error::{PipelineError, Result};
use crate::tensor::{DenseArray, NamedTensorList, TensorHandle, TensorPayload};
use super::Inferer;

const OUTPUT_NAME: &str = "c";

/// Adds its two inputs and emits the result as `c`.
///
/// The inputs are either two tensors of the same shape (scalars, or the
/// `[N]` columns of a batch) or a single tensor holding exactly two elements.
#[derive(Debug, Default)]
pub struct SumInferer {
    path: PathBuf,
    device: Device,
    loaded: bool,
}

impl SumInferer {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(inputs: &NamedTensorList) -> Result<TensorPayload> {
        let tensors: Vec<&TensorHandle> = inputs.iter().collect();
        match tensors.as_slice() {
            [lhs, rhs] => {
                if let (TensorPayload::Scalar(a), TensorPayload::Scalar(b)) = (lhs.payload(), rhs.payload()) {
                    return Ok(TensorPayload::Scalar(a + b));
                }
                let lhs = lhs.payload().to_dense().map_err(PipelineError::infer)?;
                let rhs = rhs.payload().to_dense().map_err(PipelineError::infer)?;
                if lhs.shape() != rhs.shape() {
                    return Err(PipelineError::infer(format!(
                        "input shapes differ: {:?} and {:?}", lhs.shape(), rhs.shape()
                    )));
                }
                let values = lhs
                    .to_f32_vec()
                    .into_iter()
                    .zip(rhs.to_f32_vec())
                    .map(|(a, b)| a + b)
                    .collect();
                let sum = DenseArray::from_f32(lhs.shape().to_vec(), values).map_err(PipelineError::infer)?;
                Ok(TensorPayload::Dense(sum))
            }
            [single] => {
                let values = single.payload().to_dense().map_err(PipelineError::infer)?.to_f32_vec();
                match values.as_slice() {
                    [a, b] => Ok(TensorPayload::Scalar(a + b)),
                    _ => Err(PipelineError::infer("inputs size should be 2.")),
                }
            }
            _ => Err(PipelineError::infer("inputs size should be 2.")),
        }
    }
}

#[async_trait]
impl Inferer for SumInferer {
    fn name(&self) -> &str {
        "sum"
    }

    fn init(&mut self, path: &Path, device: Device, _args: &PluginArgs) -> Result<()> {
        self.path = path.to_path_buf();
        self.device = device;
        info!(path = %self.path.display(), device = %device, "sum inferer init");
        Ok(())
    }

    async fn load(&mut self) -> Result<()> {
        if self.loaded {
            debug!("sum inferer already loaded");
            return Ok(());
        }
        self.loaded = true;
        info!("sum inferer load");
        Ok(())
    }

    async fn infer(&self, inputs: NamedTensorList, ctx: &mut RequestContext) -> Result<NamedTensorList> {
        if !self.loaded {
            return Err(ctx.fail(PipelineError::infer("sum inferer is not loaded")));
        }
        let sum = Self::add(&inputs).map_err(|err| ctx.fail(err))?;
        Ok(NamedTensorList::new().with(TensorHandle::new(OUTPUT_NAME, sum)))
    }
}
