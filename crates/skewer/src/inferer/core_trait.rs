use std::path::Path;
use async_trait::async_trait;
use crate::config::{Device, PluginArgs};
use crate::context::RequestContext;
use crate::error::{PipelineError, Result};
use crate::message::WireMessage;
use crate::tensor::NamedTensorList;

/// A model runner.
///
/// Lifecycle: [`init`](Inferer::init) then [`load`](Inferer::load), both with
/// `&mut self` and both fatal on failure. After loading the inferer is shared
/// behind an `Arc` and `infer` may be called concurrently.
///
/// # Example
///
/// ```ignore
/// use skewer::inferer::Inferer;
///
/// #[async_trait]
/// impl Inferer for Identity {
///     fn name(&self) -> &str { "identity" }
///
///     fn init(&mut self, _path: &Path, _device: Device, _args: &PluginArgs) -> Result<()> { Ok(()) }
///
///     async fn load(&mut self) -> Result<()> { Ok(()) }
///
///     async fn infer(&self, inputs: NamedTensorList, _ctx: &mut RequestContext) -> Result<NamedTensorList> {
///         Ok(inputs)
///     }
/// }
/// ```
#[async_trait]
pub trait Inferer: Send + Sync {
    /// Name the inferer is registered under.
    fn name(&self) -> &str;

    /// Records where the model lives and how to run it.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] for missing or malformed arguments.
    fn init(&mut self, path: &Path, device: Device, args: &PluginArgs) -> Result<()>;

    /// Reads the model artifacts.
    ///
    /// Calling `load` on an already loaded inferer does nothing.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Load`] when the artifacts cannot be read or parsed.
    async fn load(&mut self) -> Result<()>;

    /// Runs the model on one request's (or one batch's) inputs.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Infer`] when the inputs do not match the model's
    /// signature or the model is not loaded.
    async fn infer(&self, inputs: NamedTensorList, ctx: &mut RequestContext) -> Result<NamedTensorList>;

    /// Runs the model once on the batched inputs of a group of requests.
    ///
    /// The default calls [`infer`](Inferer::infer) with a context of its own
    /// for the whole group and, on failure, records the error in every
    /// request's context.
    async fn batch_infer(&self, inputs: NamedTensorList, ctxs: &mut [RequestContext]) -> Result<NamedTensorList> {
        let Some(first) = ctxs.first() else {
            return Err(PipelineError::infer("batch is empty"));
        };
        let mut batch_ctx = RequestContext::new(first.shared_request());
        match self.infer(inputs, &mut batch_ctx).await {
            Ok(outputs) => Ok(outputs),
            Err(err) => {
                for ctx in ctxs.iter_mut() {
                    ctx.fail(err.clone());
                }
                Err(err)
            }
        }
    }

    /// Whether [`infer_message`](Inferer::infer_message) is implemented.
    fn supports_messages(&self) -> bool {
        false
    }

    /// Serves a wire message directly, for pipelines without a converter.
    ///
    /// Streaming inferers emit partial responses through
    /// [`RequestContext::streaming_respond`] and return the final message.
    async fn infer_message(&self, _request: &WireMessage, ctx: &mut RequestContext) -> Result<WireMessage> {
        Err(ctx.fail(PipelineError::infer(format!(
            "{}: no-converter mode not supported", self.name()
        ))))
    }
}
