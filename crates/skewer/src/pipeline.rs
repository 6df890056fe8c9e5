//! # Pipeline
//!
//! An in-process driver that runs requests through a converter / inferer
//! pair the way a serving host would:
//!
//! ```text
//! request -> preprocess -> infer -> postprocess -> response
//! request -> infer_message ----------------------> response   (no converter)
//! ```
//!
//! A pipeline is built from a [`PipelineConfig`] in one go (create, `init`,
//! `load`); once built it only serves. Every call returns a well-formed
//! response: when a stage fails, the request's context holds the error and the
//! response is the error response.

use std::sync::Arc;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use crate::communication::{ItemStream, chunk_channel};
use crate::config::PipelineConfig;
use crate::context::{Disconnect, DisconnectHandle, RequestContext};
use crate::converter::Converter;
use crate::error::{PipelineError, Result};
use crate::inferer::Inferer;
use crate::message::WireMessage;
use crate::registry::Registry;

pub struct Pipeline {
    converter: Option<Arc<dyn Converter>>,
    inferer: Arc<dyn Inferer>,
    max_batch_size: usize,
}

impl Pipeline {
    /// Creates, initializes and loads the configured plugins.
    ///
    /// # Errors
    ///
    /// Any startup failure of a plugin, plus [`PipelineError::Config`] for a
    /// pipeline without converter whose inferer cannot serve messages.
    pub async fn build(registry: &Registry, config: &PipelineConfig) -> Result<Self> {
        let converter = match &config.converter {
            Some(converter_config) => {
                let mut converter = registry.create_converter(&converter_config.name)?;
                converter.init(&converter_config.path, &converter_config.args)?;
                Some(Arc::from(converter))
            }
            None => None,
        };

        let inferer_config = &config.inferer;
        let mut inferer = registry.create_inferer(&inferer_config.name)?;
        inferer.init(&inferer_config.path, inferer_config.device, &inferer_config.args)?;
        inferer.load().await?;

        Self::from_parts(converter, Arc::from(inferer), config.max_batch_size)
    }

    /// Assembles a pipeline from plugins that are already initialized and loaded.
    pub fn from_parts(
        converter: Option<Arc<dyn Converter>>,
        inferer: Arc<dyn Inferer>,
        max_batch_size: usize
    ) -> Result<Self> {
        if converter.is_none() && !inferer.supports_messages() {
            return Err(PipelineError::config(format!(
                "inferer `{}` needs a converter", inferer.name()
            )));
        }
        if max_batch_size == 0 {
            return Err(PipelineError::config("max_batch_size must be at least 1"));
        }
        info!(
            converter = converter.as_ref().map(|c| c.name()).unwrap_or("<none>"),
            inferer = inferer.name(),
            max_batch_size,
            "pipeline ready"
        );
        Ok(Self {
            converter,
            inferer,
            max_batch_size,
        })
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Serves one unary request.
    pub async fn handle(&self, request: Arc<WireMessage>) -> WireMessage {
        let mut ctx = RequestContext::new(request);
        self.handle_with(&mut ctx).await
    }

    /// Serves the request `ctx` was created for.
    pub async fn handle_with(&self, ctx: &mut RequestContext) -> WireMessage {
        let request = ctx.shared_request();
        let result = self.run(&request, ctx).await;
        response_for(result, ctx, &request)
    }

    async fn run(&self, request: &WireMessage, ctx: &mut RequestContext) -> Result<WireMessage> {
        let Some(converter) = self.converter.as_ref() else {
            return self.inferer.infer_message(request, ctx).await;
        };

        let inputs = converter.preprocess(request, ctx).await?;
        checkpoint(ctx)?;
        debug!(request_id = %ctx.request_id(), inputs = ?inputs.names(), "preprocessed");

        let outputs = self.inferer.infer(inputs, ctx).await?;
        checkpoint(ctx)?;
        debug!(request_id = %ctx.request_id(), outputs = ?outputs.names(), "inferred");

        converter.postprocess(outputs, ctx).await
    }

    /// Serves a batch of requests in groups of at most `max_batch_size`.
    ///
    /// Returns exactly one response per request, in request order.
    pub async fn handle_batch(&self, requests: Vec<Arc<WireMessage>>) -> Vec<WireMessage> {
        let mut responses = Vec::with_capacity(requests.len());
        for group in requests.chunks(self.max_batch_size) {
            responses.extend(self.handle_group(group).await);
        }
        responses
    }

    async fn handle_group(&self, requests: &[Arc<WireMessage>]) -> Vec<WireMessage> {
        let Some(converter) = self.converter.as_ref() else {
            return join_all(requests.iter().cloned().map(|request| self.handle(request))).await;
        };

        let mut ctxs: Vec<RequestContext> = requests.iter().cloned().map(RequestContext::new).collect();
        debug!(batch = requests.len(), "batch started");
        match self.run_group(converter.as_ref(), requests, &mut ctxs).await {
            // a request whose context holds an error answers with that error
            Ok(responses) if responses.len() == requests.len() => responses
                .into_iter()
                .zip(&ctxs)
                .map(|(response, ctx)| {
                    ctx.error_response()
                        .unwrap_or_else(|| response.respond_to(ctx.request()))
                })
                .collect(),
            Ok(responses) => {
                let err = PipelineError::output(format!(
                    "batch of {} produced {} responses", requests.len(), responses.len()
                ));
                error!("{}", err);
                fail_group(&mut ctxs, &err)
            }
            Err(err) => fail_group(&mut ctxs, &err),
        }
    }

    async fn run_group(
        &self,
        converter: &dyn Converter,
        requests: &[Arc<WireMessage>],
        ctxs: &mut [RequestContext]
    ) -> Result<Vec<WireMessage>> {
        let inputs = converter.batch_preprocess(requests, ctxs).await?;
        group_checkpoint(ctxs)?;
        let outputs = self.inferer.batch_infer(inputs, ctxs).await?;
        group_checkpoint(ctxs)?;
        converter.batch_postprocess(outputs, ctxs).await
    }

    /// Serves one request as a streaming call on the current tokio runtime.
    ///
    /// Partial responses arrive on [`StreamingSession::chunks`] as the inferer
    /// emits them; [`StreamingSession::finish`] yields the final response.
    pub fn stream(self: Arc<Self>, request: Arc<WireMessage>) -> StreamingSession {
        let (sink, chunks) = chunk_channel();
        let disconnect = Disconnect::new();
        let handle = disconnect.handle();
        let correlation = Arc::clone(&request);

        let task = tokio::spawn(async move {
            let mut ctx = RequestContext::streaming(request, Arc::new(sink), disconnect);
            self.handle_with(&mut ctx).await
        });

        StreamingSession {
            request: correlation,
            chunks,
            disconnect: handle,
            task,
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("converter", &self.converter.as_ref().map(|c| c.name().to_string()))
            .field("inferer", &self.inferer.name())
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}

/// Client side of a streaming call.
#[derive(Debug)]
pub struct StreamingSession {
    request: Arc<WireMessage>,
    chunks: ItemStream<WireMessage>,
    disconnect: DisconnectHandle,
    task: JoinHandle<WireMessage>,
}

impl StreamingSession {
    /// Partial responses, in emission order. The stream ends when the call finishes.
    pub fn chunks(&mut self) -> &mut ItemStream<WireMessage> {
        &mut self.chunks
    }

    /// Flags the client as gone. The producer stops before its next step.
    pub fn disconnect(&self) {
        self.disconnect.disconnect();
    }

    pub fn disconnect_handle(&self) -> DisconnectHandle {
        self.disconnect.clone()
    }

    /// Waits for the call to end and returns its final response.
    pub async fn finish(self) -> WireMessage {
        match self.task.await {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "streaming call aborted");
                WireMessage::error_response(&PipelineError::infer(format!("streaming call aborted: {}", err)))
                    .respond_to(&self.request)
            }
        }
    }
}

/// Stops the stage sequence once the context holds an error.
fn checkpoint(ctx: &RequestContext) -> Result<()> {
    match ctx.error() {
        Some(err) => Err(err.clone()),
        None => Ok(()),
    }
}

/// Stops a batch once every request in it holds an error. Requests that
/// failed on their own inside a healthy batch keep going and are answered
/// from their context when the batch completes.
fn group_checkpoint(ctxs: &[RequestContext]) -> Result<()> {
    match ctxs.iter().map(RequestContext::error).collect::<Option<Vec<_>>>() {
        Some(errors) => match errors.first() {
            Some(err) => Err((*err).clone()),
            None => Ok(()),
        },
        None => Ok(()),
    }
}

fn response_for(result: Result<WireMessage>, ctx: &mut RequestContext, request: &WireMessage) -> WireMessage {
    if let Err(err) = result.as_ref() {
        if !ctx.has_error() {
            ctx.fail(err.clone());
        }
    }
    match (result, ctx.error_response()) {
        (_, Some(response)) => response,
        (Ok(response), None) => response.respond_to(request),
        (Err(err), None) => WireMessage::error_response(&err).respond_to(request),
    }
}

/// One error response per request. A request that failed on its own keeps its error.
fn fail_group(ctxs: &mut [RequestContext], err: &PipelineError) -> Vec<WireMessage> {
    ctxs.iter_mut()
        .map(|ctx| {
            if !ctx.has_error() {
                ctx.fail(err.clone());
            }
            ctx.error_response()
                .unwrap_or_else(|| WireMessage::error_response(err).respond_to(ctx.request()))
        })
        .collect()
}
