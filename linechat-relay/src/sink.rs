//! Outbound line sink for a single connected client.
//!
//! A [`ClientSink`] is the sending half of a bounded queue drained by the
//! client's writer task. Sending never waits on the socket: a full queue or a
//! gone writer is reported as a [`DeliveryError`] instead.

use std::net::SocketAddr;

use linechat_proto::line::ServerLine;
use tokio::sync::mpsc;

/// Why a line could not be handed to a client's writer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The client is not draining its queue fast enough.
    #[error("outbound queue full")]
    QueueFull,
    /// The client's writer task has exited.
    #[error("client disconnected")]
    Disconnected,
}

/// Cloneable handle for writing lines to one client.
#[derive(Debug, Clone)]
pub struct ClientSink {
    tx: mpsc::Sender<String>,
    peer: SocketAddr,
}

impl ClientSink {
    /// Creates a sink with room for `capacity` pending lines, returning the
    /// receiver the writer task drains.
    ///
    /// A `capacity` of zero is raised to one.
    #[must_use]
    pub fn channel(peer: SocketAddr, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, peer }, rx)
    }

    /// Queues one line for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::QueueFull`] if the queue is at capacity, or
    /// [`DeliveryError::Disconnected`] if the writer task is gone.
    pub fn send_line(&self, line: &ServerLine) -> Result<(), DeliveryError> {
        self.tx.try_send(line.encode()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Disconnected,
        })
    }

    /// Remote address of the client behind this sink.
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the writer task has dropped its receiver.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
