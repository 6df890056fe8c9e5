use std::path::Path;
use std::sync::Arc;
use async_trait::async_trait;
use crate::config::PluginArgs;
use crate::context::RequestContext;
use crate::error::{PipelineError, Result};
use crate::message::WireMessage;
use crate::tensor::NamedTensorList;

/// Translates between wire messages and the named tensors an inferer consumes.
///
/// A converter is initialized once with `&mut self` and then shared behind an
/// `Arc`, so every processing method takes `&self` and may run concurrently
/// for different requests.
///
/// # Failure contract
///
/// A processing method that fails records the error in the request's
/// [`RequestContext`] (through [`RequestContext::fail`]) before returning it.
/// Once a context holds an error no further stage runs for that request.
///
/// # Example
///
/// ```ignore
/// use skewer::converter::Converter;
///
/// struct Upper;
///
/// #[async_trait]
/// impl Converter for Upper {
///     fn name(&self) -> &str { "upper" }
///
///     fn init(&mut self, _path: &Path, _args: &PluginArgs) -> Result<()> { Ok(()) }
///
///     async fn preprocess(&self, request: &WireMessage, ctx: &mut RequestContext) -> Result<NamedTensorList> {
///         // ...
///     }
///
///     async fn postprocess(&self, outputs: NamedTensorList, ctx: &mut RequestContext) -> Result<WireMessage> {
///         // ...
///     }
/// }
/// ```
#[async_trait]
pub trait Converter: Send + Sync {
    /// Name the converter is registered under.
    fn name(&self) -> &str;

    /// One-time setup.
    ///
    /// # Parameters
    ///
    /// * `path` - Auxiliary file of the converter (label table, vocabulary), may be empty
    /// * `args` - Converter arguments; unknown keys are ignored
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] for missing or malformed arguments and
    /// [`PipelineError::Resource`] for unreadable auxiliary files. Both are fatal.
    fn init(&mut self, path: &Path, args: &PluginArgs) -> Result<()>;

    /// Turns one request into model inputs.
    async fn preprocess(&self, request: &WireMessage, ctx: &mut RequestContext) -> Result<NamedTensorList>;

    /// Turns model outputs into the response of one request.
    async fn postprocess(&self, outputs: NamedTensorList, ctx: &mut RequestContext) -> Result<WireMessage>;

    /// Turns a group of requests into one batched set of model inputs.
    ///
    /// The default pre-processes every request on its own and stacks the
    /// results along the batch dimension, so every tensor's leading dimension
    /// equals `requests.len()`.
    ///
    /// # Parameters
    ///
    /// * `requests` - The requests of the batch, in order
    /// * `ctxs` - One context per request, positionally aligned with `requests`
    async fn batch_preprocess(
        &self,
        requests: &[Arc<WireMessage>],
        ctxs: &mut [RequestContext]
    ) -> Result<NamedTensorList> {
        check_batch_len(requests.len(), ctxs.len())?;
        let mut items = Vec::with_capacity(requests.len());
        for (request, ctx) in requests.iter().zip(ctxs.iter_mut()) {
            items.push(self.preprocess(request, ctx).await?);
        }
        NamedTensorList::stack(items)
            .map_err(|err| PipelineError::input(format!("cannot batch inputs: {}", err)))
    }

    /// Turns batched model outputs into one response per request.
    ///
    /// The default splits the outputs along the batch dimension and
    /// post-processes each item. A failing item gets its error response in
    /// place, so exactly `ctxs.len()` messages are returned, positionally
    /// aligned with the contexts.
    async fn batch_postprocess(
        &self,
        outputs: NamedTensorList,
        ctxs: &mut [RequestContext]
    ) -> Result<Vec<WireMessage>> {
        let items = outputs
            .split(ctxs.len())
            .map_err(|err| PipelineError::output(format!("cannot split batch outputs: {}", err)))?;
        let mut responses = Vec::with_capacity(ctxs.len());
        for (item, ctx) in items.into_iter().zip(ctxs.iter_mut()) {
            let response = match self.postprocess(item, ctx).await {
                Ok(response) => response,
                Err(err) => item_error_response(ctx, err),
            };
            responses.push(response);
        }
        Ok(responses)
    }
}

pub(crate) fn check_batch_len(requests: usize, ctxs: usize) -> Result<()> {
    if requests != ctxs {
        return Err(PipelineError::input(format!(
            "batch has {} requests but {} contexts", requests, ctxs
        )));
    }
    if requests == 0 {
        return Err(PipelineError::input("batch is empty"));
    }
    Ok(())
}

/// Error response for one batch item, recording `err` when the item has not failed yet.
pub(crate) fn item_error_response(ctx: &mut RequestContext, err: PipelineError) -> WireMessage {
    if !ctx.has_error() {
        ctx.fail(err);
    }
    ctx.error_response()
        .unwrap_or_else(|| WireMessage::error_response(&PipelineError::output("unknown failure")))
}
