//! # Request context
//!
//! One [`RequestContext`] accompanies a request through every stage. It
//! carries the request itself, the error state that short-circuits the
//! remaining stages, a single typed user-data slot and, for streaming calls,
//! the sink partial responses go to plus the disconnect token.

mod disconnect;
mod user_data;

pub use disconnect::{Disconnect, DisconnectHandle};
pub use user_data::UserData;

use std::any::Any;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;
use crate::communication::StreamSink;
use crate::error::{PipelineError, Result};
use crate::message::WireMessage;

#[derive(Debug)]
pub struct RequestContext {
    request: Arc<WireMessage>,
    sink: Option<Arc<dyn StreamSink>>,
    disconnect: Disconnect,
    error: Option<PipelineError>,
    user_data: UserData,
}

impl RequestContext {
    /// Context of a unary call.
    pub fn new(request: Arc<WireMessage>) -> Self {
        Self {
            request,
            sink: None,
            disconnect: Disconnect::new(),
            error: None,
            user_data: UserData::new(),
        }
    }

    /// Context of a streaming call. Chunks passed to
    /// [`streaming_respond`](Self::streaming_respond) are delivered to `sink`.
    pub fn streaming(request: Arc<WireMessage>, sink: Arc<dyn StreamSink>, disconnect: Disconnect) -> Self {
        Self {
            sink: Some(sink),
            disconnect,
            ..Self::new(request)
        }
    }

    pub fn request(&self) -> &WireMessage {
        &self.request
    }

    pub fn shared_request(&self) -> Arc<WireMessage> {
        Arc::clone(&self.request)
    }

    pub fn request_id(&self) -> Uuid {
        self.request.correlation_id()
    }

    /// Records `err` as the request's failure and hands it back for `?`.
    ///
    /// Only the first failure is kept; later ones are logged and dropped.
    pub fn fail(&mut self, err: PipelineError) -> PipelineError {
        match &self.error {
            None => {
                error!(request_id = %self.request_id(), kind = ?err.kind(), "{}", err.message());
                self.error = Some(err.clone());
            }
            Some(first) => {
                warn!(
                    request_id = %self.request_id(),
                    first = %first,
                    "ignoring subsequent failure: {}", err
                );
            }
        }
        err
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&PipelineError> {
        self.error.as_ref()
    }

    /// The response for the recorded failure, `None` while the request is healthy.
    pub fn error_response(&self) -> Option<WireMessage> {
        self.error
            .as_ref()
            .map(|err| WireMessage::error_response(err).respond_to(&self.request))
    }

    pub fn is_streaming(&self) -> bool {
        self.sink.is_some()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnect.is_set()
    }

    /// Emits one partial response immediately.
    ///
    /// Returns `false` without sending when the call is not streaming or the
    /// client is gone. A send the sink cannot deliver marks the client as
    /// disconnected.
    pub fn streaming_respond(&self, chunk: WireMessage) -> bool {
        let Some(sink) = self.sink.as_ref() else {
            return false;
        };
        if self.disconnect.is_set() {
            return false;
        }
        let delivered = sink.send(chunk.respond_to(&self.request));
        if !delivered {
            self.disconnect.set();
        }
        delivered
    }

    pub fn put<T: Any + Send + Sync>(&mut self, value: T) -> Result<()> {
        self.user_data.put(value)
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Result<&T> {
        self.user_data.get()
    }

    pub fn take<T: Any + Send + Sync>(&mut self) -> Result<T> {
        self.user_data.take()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::test_support::streaming_context;
    use crate::communication::chunk_channel;
    use crate::error::ErrorKind;
    use crate::message::Status;

    #[test]
    fn test_first_failure_wins() {
        let mut ctx = RequestContext::new(Arc::new(WireMessage::text("x")));
        assert!(!ctx.has_error());
        assert!(ctx.error_response().is_none());

        let returned = ctx.fail(PipelineError::input("Parse json failed."));
        assert_eq!(returned.kind(), ErrorKind::Input);
        ctx.fail(PipelineError::output("Infer out is empty."));

        assert_eq!(ctx.error(), Some(&PipelineError::input("Parse json failed.")));
        let response = ctx.error_response().unwrap();
        assert_eq!(response.status(), Some(Status::BAD_REQUEST));
        assert_eq!(response.correlation_id(), ctx.request_id());
    }

    #[test]
    fn test_unary_context_does_not_stream() {
        let ctx = RequestContext::new(Arc::new(WireMessage::empty()));
        assert!(!ctx.is_streaming());
        assert!(!ctx.streaming_respond(WireMessage::text("ignored")));
    }

    #[test]
    fn test_user_data_round_trip() {
        let mut ctx = RequestContext::new(Arc::new(WireMessage::empty()));
        ctx.put(vec![1usize, 4]).unwrap();
        assert_eq!(ctx.get::<Vec<usize>>().unwrap(), &vec![1, 4]);
        assert!(ctx.put(0u8).is_err());
        assert_eq!(ctx.take::<Vec<usize>>().unwrap(), vec![1, 4]);
    }

    #[test]
    fn test_nothing_emitted_after_disconnect() {
        let (ctx, sink) = streaming_context(WireMessage::text("prime"), Some(2));
        assert!(ctx.streaming_respond(WireMessage::text("a")));
        assert!(!ctx.is_disconnected());
        assert!(ctx.streaming_respond(WireMessage::text("b")));
        assert!(ctx.is_disconnected());
        assert!(!ctx.streaming_respond(WireMessage::text("c")));
        assert_eq!(sink.texts(), vec!["a", "b"]);
    }

    #[test]
    fn test_dropped_receiver_marks_disconnect() {
        let (sink, stream) = chunk_channel();
        let ctx = RequestContext::streaming(
            Arc::new(WireMessage::empty()),
            Arc::new(sink),
            Disconnect::new(),
        );
        drop(stream);
        assert!(!ctx.streaming_respond(WireMessage::text("lost")));
        assert!(ctx.is_disconnected());
    }

    #[tokio::test]
    async fn test_chunks_carry_request_id() {
        use futures::StreamExt;

        let (sink, mut stream) = chunk_channel();
        let request = Arc::new(WireMessage::text("prime"));
        let ctx = RequestContext::streaming(request.clone(), Arc::new(sink), Disconnect::new());
        ctx.streaming_respond(WireMessage::text("chunk"));
        drop(ctx);

        let chunk = stream.next().await.unwrap();
        assert_eq!(chunk.correlation_id(), request.correlation_id());
        assert!(stream.next().await.is_none());
    }
}
