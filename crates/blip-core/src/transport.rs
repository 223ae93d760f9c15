//! The framed transport the engine runs over.
//!
//! The engine never touches sockets. It consumes anything that can carry
//! ordered, opaque binary frames in both directions — in production a
//! WebSocket in binary mode (negotiating the `BLIP_3` subprotocol token
//! during its handshake), in tests an in-memory pipe. Back-pressure is
//! the transport's job: `send` is expected to suspend once enough bytes
//! are in flight.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Failures surfaced by a transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection is gone; treated by the engine as end-of-loop.
    #[error("transport closed")]
    Closed,

    /// An I/O failure from the underlying connection.
    #[error("transport i/o: {0}")]
    Io(String),
}

/// A bidirectional, ordered, frame-preserving byte transport.
#[async_trait(?Send)]
pub trait Transport {
    /// Whether frames can still be sent.
    fn can_send(&self) -> bool;

    /// Whether frames can still be received.
    fn can_receive(&self) -> bool;

    /// Send one frame. Suspends for back-pressure; resolving with an
    /// error means the connection is unusable.
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Receive one frame. An empty frame signals a clean close by the
    /// peer.
    async fn receive(&self) -> Result<Bytes, TransportError>;

    /// Close gracefully: the peer's `receive` observes a clean close.
    async fn close(&self) -> Result<(), TransportError>;

    /// Tear the connection down immediately, without the closing
    /// handshake.
    fn disconnect(&self);
}
