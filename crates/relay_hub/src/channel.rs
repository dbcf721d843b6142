//! Connection channel: the per-peer duplex abstraction the relay core sees.
//!
//! The inbound half is anything implementing [`InboundChannel`]; the
//! outbound half is an [`Outbox`], an unbounded queue drained by a writer
//! task owned by the transport. Sending never blocks the caller, so the
//! registry can hand out outboxes and forward through them without waiting
//! on a slow peer.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RelayError;

/// A frame queued for delivery to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// A text message, delivered verbatim.
    Text(String),
    /// Ask the writer to close the connection with the given reason.
    Close(String),
}

/// Write handle for one connection.
///
/// Cloning an outbox is cheap; every clone feeds the same writer. The
/// connection is considered gone once the writer drops its receiver.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl Outbox {
    /// Create an outbox and the receiver its writer task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a text frame. Fails only if the writer has already gone away.
    pub fn send(&self, text: impl Into<String>) -> Result<(), RelayError> {
        self.tx
            .send(Outgoing::Text(text.into()))
            .map_err(|_| RelayError::TransportClosed)
    }

    /// Ask the writer to close the connection. Best-effort.
    pub fn close(&self, reason: impl Into<String>) {
        let _ = self.tx.send(Outgoing::Close(reason.into()));
    }

    /// Whether the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the writer side has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Read side of a peer connection.
#[async_trait]
pub trait InboundChannel: Send {
    /// Wait for the next text message.
    ///
    /// Returns `None` once the connection is closed and `Some(Err(_))` on an
    /// unrecoverable read error.
    async fn recv(&mut self) -> Option<Result<String, RelayError>>;
}

/// In-process peers (and tests) can feed a session from a plain channel.
#[async_trait]
impl InboundChannel for mpsc::UnboundedReceiver<String> {
    async fn recv(&mut self) -> Option<Result<String, RelayError>> {
        mpsc::UnboundedReceiver::recv(self).await.map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outbox_send_and_close() {
        let (outbox, mut rx) = Outbox::channel();
        outbox.send("hello").unwrap();
        outbox.close("bye");

        assert_eq!(rx.recv().await, Some(Outgoing::Text("hello".into())));
        assert_eq!(rx.recv().await, Some(Outgoing::Close("bye".into())));
    }

    #[tokio::test]
    async fn test_send_after_writer_dropped_fails() {
        let (outbox, rx) = Outbox::channel();
        drop(rx);

        assert!(outbox.is_closed());
        assert!(matches!(outbox.send("x"), Err(RelayError::TransportClosed)));
        // Resolves immediately once the receiver is gone.
        outbox.closed().await;
    }

    #[tokio::test]
    async fn test_memory_inbound() {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tx.send("one".into()).unwrap();
        drop(tx);

        let first = InboundChannel::recv(&mut rx).await;
        assert_eq!(first.unwrap().unwrap(), "one");
        assert!(InboundChannel::recv(&mut rx).await.is_none());
    }
}
