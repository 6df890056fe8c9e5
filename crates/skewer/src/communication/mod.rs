//! # Streaming plumbing
//!
//! Partial responses leave a streaming call through a [`StreamSink`] held by
//! the request context. The default sink is one half of an unbounded channel;
//! the client side reads the other half as an [`ItemStream`].

mod item_stream;
mod sink;

pub use item_stream::ItemStream;
pub use sink::{ChannelSink, StreamSink, chunk_channel};
