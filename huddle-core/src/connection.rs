//! Connection capability
//!
//! A participant's connection is split in two halves. The core holds a
//! [`ConnectionHandle`] for sending and closing; the transport owns the
//! inbound [`MessageStream`] and drains the [`OutboundReceiver`] into the
//! socket. Sends never block: each connection has a bounded queue and a full
//! queue is reported as an error instead of stalling the sender.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::protocol::{Message, ProtocolError};
use crate::{Error, Result};

/// Sending half of a connection, shared by everything that addresses the participant
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

/// Create a connection handle and the outbound queue the transport drains
#[must_use]
pub fn channel(capacity: usize) -> (ConnectionHandle, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let cancel = CancellationToken::new();
    (
        ConnectionHandle {
            tx,
            cancel: cancel.clone(),
        },
        OutboundReceiver { rx, cancel },
    )
}

impl ConnectionHandle {
    pub fn send(&self, message: Message) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => {
                Error::Internal("outbound queue full: client too slow".to_string())
            }
            TrySendError::Closed(_) => Error::ConnectionClosed,
        })
    }

    /// Close the connection. Messages queued before the call are still delivered.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the connection is closed
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }
}

/// Outbound queue of one connection
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
}

impl OutboundReceiver {
    /// Next message to write, or `None` once the connection is closed and the
    /// queue is empty
    pub async fn recv(&mut self) -> Option<Message> {
        tokio::select! {
            biased;
            msg = self.rx.recv() => msg,
            () = self.cancel.cancelled() => self.rx.try_recv().ok(),
        }
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now
    pub fn drain(&mut self) -> Vec<Message> {
        std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Error, Debug)]
pub enum RecvError {
    /// The frame arrived but is not a valid message
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The transport failed; the connection is unusable
    #[error("transport error: {0}")]
    Transport(String),
}

/// Inbound half of a connection
///
/// `recv` must be cancel safe: it is raced against session events and
/// timers.
#[async_trait]
pub trait MessageStream: Send {
    /// `None` when the peer closed the connection
    async fn recv(&mut self) -> Option<std::result::Result<Message, RecvError>>;
}

/// In-process transport, for embedding the server without a socket
pub mod memory {
    use super::{async_trait, mpsc, Message, MessageStream, RecvError};

    enum Frame {
        Text(String),
        Fail(String),
    }

    /// Client side of an in-memory connection
    #[derive(Clone)]
    pub struct MemorySender {
        tx: mpsc::UnboundedSender<Frame>,
    }

    impl MemorySender {
        /// Send a raw text frame. Returns false once the stream is gone.
        pub fn send_text(&self, text: impl Into<String>) -> bool {
            self.tx.send(Frame::Text(text.into())).is_ok()
        }

        pub fn send(&self, message: &Message) -> bool {
            match message.encode() {
                Ok(text) => self.send_text(text),
                Err(_) => false,
            }
        }

        /// Inject a transport failure
        pub fn fail(&self, reason: impl Into<String>) -> bool {
            self.tx.send(Frame::Fail(reason.into())).is_ok()
        }
    }

    /// Server side of an in-memory connection; ends when every sender is dropped
    pub struct MemoryStream {
        rx: mpsc::UnboundedReceiver<Frame>,
    }

    #[must_use]
    pub fn pair() -> (MemorySender, MemoryStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MemorySender { tx }, MemoryStream { rx })
    }

    #[async_trait]
    impl MessageStream for MemoryStream {
        async fn recv(&mut self) -> Option<Result<Message, RecvError>> {
            match self.rx.recv().await? {
                Frame::Text(text) => Some(Message::decode(&text).map_err(RecvError::from)),
                Frame::Fail(reason) => Some(Err(RecvError::Transport(reason))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageKind, Payload};

    #[tokio::test]
    async fn test_queued_messages_survive_close() {
        let (handle, mut outbound) = channel(8);
        handle.send(Message::new(Payload::Deny("g1".into()))).unwrap();
        handle.close();

        assert!(handle.is_closed());
        assert!(matches!(
            handle.send(Message::new(Payload::Knock)),
            Err(Error::ConnectionClosed)
        ));

        let first = outbound.recv().await.unwrap();
        assert_eq!(first.kind(), MessageKind::Deny);
        assert!(outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_full_queue_is_an_error() {
        let (handle, _outbound) = channel(1);
        handle.send(Message::new(Payload::Knock)).unwrap();
        assert!(matches!(
            handle.send(Message::new(Payload::Knock)),
            Err(Error::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_stream() {
        let (client, mut stream) = memory::pair();
        client.send_text(r#"{"type":"allow","data":"g1"}"#);
        client.send_text("garbage");
        client.fail("reset");
        drop(client);

        let msg = stream.recv().await.unwrap().unwrap();
        assert_eq!(msg.payload, Payload::Allow("g1".into()));
        assert!(matches!(
            stream.recv().await,
            Some(Err(RecvError::Protocol(_)))
        ));
        assert!(matches!(
            stream.recv().await,
            Some(Err(RecvError::Transport(_)))
        ));
        assert!(stream.recv().await.is_none());
    }
}
