use std::fmt::Debug;
use tokio::sync::mpsc::{self, UnboundedSender};
use crate::message::WireMessage;
use super::ItemStream;

/// Destination for the partial responses of one streaming call.
pub trait StreamSink: Debug + Send + Sync {
    /// Emits one chunk immediately. Returns `false` when the client is gone
    /// and the chunk could not be delivered.
    fn send(&self, chunk: WireMessage) -> bool;
}

/// A [`StreamSink`] backed by an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: UnboundedSender<WireMessage>
}

impl ChannelSink {
    pub fn new(sender: UnboundedSender<WireMessage>) -> Self {
        Self { sender }
    }
}

impl StreamSink for ChannelSink {
    fn send(&self, chunk: WireMessage) -> bool {
        self.sender.send(chunk).is_ok()
    }
}

/// Creates a connected sink / stream pair.
pub fn chunk_channel() -> (ChannelSink, ItemStream<WireMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink::new(tx), ItemStream::new(rx))
}
