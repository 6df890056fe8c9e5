use std::pin::Pin;
use std::task::{Context, Poll};
use futures::Stream;
use tokio::sync::mpsc;

/// # ItemStream
///
/// An asynchronous stream wrapper around a Tokio unbounded channel receiver.
///
/// `ItemStream` implements the `Stream` trait from the `futures` crate,
/// allowing it to be used with stream combinators and async iteration.
///
/// ## Usage Context
///
/// The client side of a streaming call reads the partial responses from an
/// `ItemStream`, in the order the inferer emitted them. The stream ends once
/// the call finishes and its context (holding the sender) is dropped.
///
/// Dropping the stream early is how a client disconnects: the next send on
/// the producer side fails and the producer's context reports itself as
/// disconnected.
///
/// ## Limitations
///
/// - No built-in backpressure mechanism (uses unbounded channels)
/// - No mechanism to peek at the next item without consuming it
#[derive(Debug)]
pub struct ItemStream<T> {
    /// The underlying channel receiver
    receiver: mpsc::UnboundedReceiver<T>
}

impl<T> ItemStream<T> {
    /// Creates a new `ItemStream` from a Tokio unbounded channel receiver.
    pub fn new(receiver: mpsc::UnboundedReceiver<T>) -> Self {
        Self {
            receiver,
        }
    }
}

impl<T> Stream for ItemStream<T> {
    type Item = T;

    /// Delegates to the underlying receiver. Returns `Poll::Ready(None)` once
    /// every sender is dropped and the buffer is drained.
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().receiver).poll_recv(cx)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::test;
    use futures::StreamExt;
    use tokio::sync::mpsc::unbounded_channel;
    use crate::message::WireMessage;

    #[test]
    async fn test_receives_chunks_in_order() {
        let (tx, rx) = unbounded_channel::<WireMessage>();
        let mut stream = ItemStream::new(rx);

        for word in ["the", "quick", "fox"] {
            tx.send(WireMessage::text(word)).unwrap();
        }
        drop(tx);

        let mut received = Vec::new();
        while let Some(chunk) = stream.next().await {
            received.push(chunk.as_text().unwrap().to_string());
        }

        assert_eq!(received, vec!["the", "quick", "fox"], "Stream should receive chunks in order");
    }

    #[test]
    async fn test_empty_stream() {
        let (tx, rx) = unbounded_channel::<WireMessage>();
        let mut stream = ItemStream::new(rx);

        drop(tx);

        let result = stream.next().await;
        assert!(result.is_none(), "Empty stream should return None");
    }

    #[test]
    async fn test_dropping_stream_closes_sender() {
        let (tx, rx) = unbounded_channel::<WireMessage>();
        let stream = ItemStream::new(rx);

        drop(stream);

        assert!(tx.is_closed());
        assert!(tx.send(WireMessage::text("late")).is_err());
    }
}
