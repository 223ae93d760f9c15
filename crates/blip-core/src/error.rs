//! Engine-level error types.
//!
//! Wire-format violations come from `blip-proto`, compression failures
//! from the codec, and I/O failures from the transport; [`EngineError`]
//! is the umbrella the engine loops work in. Application handler failures
//! are not engine errors at all — they travel back to the requester as an
//! error message, modeled by [`HandlerError`].

use thiserror::Error;

use blip_proto::{ProtocolError, properties};

use crate::{codec::CodecError, transport::TransportError};

/// Fatal engine failures. Any of these ends the connection.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The peer sent a malformed or out-of-protocol frame.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Compression or checksum failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The engine has already shut down; no further messages can be sent.
    #[error("engine is closed")]
    Closed,
}

/// Failure reported by an application request handler.
///
/// Sent back to the requester as an error response with the
/// `Error-Domain`/`Error-Code` properties and the message text as body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{domain}/{code}: {message}")]
pub struct HandlerError {
    /// Error domain, `BLIP` for protocol-level failures.
    pub domain: String,
    /// Numeric code within the domain.
    pub code: i64,
    /// Human-readable description, sent as the response body.
    pub message: String,
}

impl HandlerError {
    /// A handler error with an explicit domain and code.
    pub fn new(domain: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self { domain: domain.into(), code, message: message.into() }
    }
}

impl From<String> for HandlerError {
    /// A bare message maps to the generic handler-failure code.
    fn from(message: String) -> Self {
        Self::new(properties::BLIP_ERROR_DOMAIN, properties::ERROR_HANDLER_FAILED, message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::from(message.to_string())
    }
}
