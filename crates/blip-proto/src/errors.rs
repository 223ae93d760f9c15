//! Wire-level error types.
//!
//! Every variant here is fatal for the connection that produced it: a peer
//! that sends a malformed frame cannot be resynchronized, so the engine
//! closes the transport. Application-level failures travel as error
//! *messages* instead and never appear in this enum.

use thiserror::Error;

use crate::MessageType;

/// Errors raised while parsing or validating wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A varint ran past its 10-byte maximum or the input ended first.
    #[error("truncated varint")]
    TruncatedVarint,

    /// A frame ended before a required field.
    #[error("frame truncated: needed {expected} more byte(s), had {actual}")]
    FrameTruncated {
        /// Bytes still required by the field being parsed
        expected: usize,
        /// Bytes actually remaining
        actual: usize,
    },

    /// The 3-bit type field held a value with no assigned meaning.
    #[error("invalid message type {0}")]
    InvalidMessageType(u8),

    /// A request number skipped ahead of the expected sequence.
    #[error("message number {number} out of order (highest seen {highest})")]
    MessageNumberOutOfOrder {
        /// Number carried by the offending frame
        number: u64,
        /// Highest request number seen so far from this peer
        highest: u64,
    },

    /// A continuation frame arrived for a number no longer being tracked.
    #[error("duplicate or stale message number {0}")]
    DuplicateMessageNumber(u64),

    /// A response arrived for a request that was never sent.
    #[error("response for unknown message number {0}")]
    UnknownResponseNumber(u64),

    /// A later frame of a message carried a different type than its first
    /// frame (and the new type was not an error takeover).
    #[error("message {number} changed type mid-stream from {was} to {now}")]
    InconsistentMessageType {
        /// Message the frames belong to
        number: u64,
        /// Type established by the first frame
        was: MessageType,
        /// Type carried by the offending frame
        now: MessageType,
    },

    /// The final frame arrived while the property block was still short.
    #[error("message ended before its properties were complete")]
    IncompleteProperties,
}

/// Convenience alias used throughout the wire-level code.
pub type Result<T> = core::result::Result<T, ProtocolError>;
