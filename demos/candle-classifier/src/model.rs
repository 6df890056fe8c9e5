use std::path::Path;
use async_trait::async_trait;
use candle_core::{DType, Device as CandleDevice, Tensor};
use skewer::backend::candle::{dense_to_candle, handle_from_candle};
use skewer::{Device, NamedTensorList, PipelineError, PluginArgs, RequestContext, Result};
use skewer::inferer::Inferer;
use tracing::info;

/// A single linear layer over flattened images, scoring `classes` classes.
///
/// The weights are random; the point is the tensor plumbing, not the accuracy.
pub struct LinearClassifier {
    device: CandleDevice,
    classes: usize,
    features: usize,
    weights: Option<Tensor>,
}

impl LinearClassifier {
    pub fn new() -> Self {
        Self {
            device: CandleDevice::Cpu,
            classes: 0,
            features: 0,
            weights: None,
        }
    }
}

fn engine_err(err: candle_core::Error) -> PipelineError {
    PipelineError::infer(err)
}

#[async_trait]
impl Inferer for LinearClassifier {
    fn name(&self) -> &str {
        "candle_linear"
    }

    fn init(&mut self, _path: &Path, device: Device, args: &PluginArgs) -> Result<()> {
        self.classes = args.required("classes")?;
        let image_size: usize = args.required("image_size")?;
        self.features = 3 * image_size * image_size;
        self.device = match device {
            Device::Cpu => CandleDevice::Cpu,
            Device::Cuda(ordinal) => CandleDevice::new_cuda(ordinal)
                .map_err(|err| PipelineError::config(format!("cannot use {}: {}", device, err)))?,
        };
        Ok(())
    }

    async fn load(&mut self) -> Result<()> {
        if self.weights.is_some() {
            return Ok(());
        }
        let weights = Tensor::randn(0f32, 1.0, (self.classes, self.features), &self.device)
            .and_then(|w| w.to_dtype(DType::F32))
            .map_err(PipelineError::load)?;
        info!(classes = self.classes, features = self.features, "candle_linear load");
        self.weights = Some(weights);
        Ok(())
    }

    async fn infer(&self, inputs: NamedTensorList, ctx: &mut RequestContext) -> Result<NamedTensorList> {
        let weights = self.weights
            .as_ref()
            .ok_or_else(|| ctx.fail(PipelineError::infer("candle_linear is not loaded")))?;
        let images = inputs
            .first()
            .ok_or_else(|| ctx.fail(PipelineError::infer("missing `inputs`")))?
            .payload()
            .to_dense()
            .map_err(|err| ctx.fail(PipelineError::infer(err)))?;
        let batch = images.shape()[0];

        let scores = dense_to_candle(&images, &self.device)
            .map_err(|err| ctx.fail(PipelineError::infer(err)))?
            .reshape((batch, self.features))
            .and_then(|x| x.matmul(&weights.t()?))
            .map_err(|err| ctx.fail(engine_err(err)))?;
        Ok(NamedTensorList::new().with(handle_from_candle("scores", scores)))
    }
}
