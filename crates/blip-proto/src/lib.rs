//! Wire-level primitives for the BLIP multiplexing protocol.
//!
//! BLIP runs request/response messaging over any transport that carries
//! ordered, opaque binary frames (typically a WebSocket). This crate holds
//! the pieces both peers must agree on byte-for-byte: the varint codec,
//! the frame flag layout, property encoding, the CRC32 trailer, and the
//! flow-control thresholds. The engine that moves messages lives in
//! `blip-core`.

pub mod checksum;
pub mod errors;
pub mod flags;
pub mod frame;
pub mod properties;
pub mod varint;

pub use checksum::Crc32;
pub use errors::ProtocolError;
pub use flags::{FrameFlags, MessageType};
pub use frame::FrameHeader;

/// Per-direction sequential message identifier. Requests are numbered by
/// their sender starting at 1; a response reuses its request's number.
pub type MessageNo = u64;

/// Unacked bytes of one incoming message after which the receiver emits
/// an ACK frame.
pub const INCOMING_ACK_THRESHOLD: u64 = 50_000;

/// Unacked bytes of one outgoing message after which the sender pauses it
/// until an ACK arrives.
pub const OUTGOING_ACK_THRESHOLD: u64 = 100_000;

/// Frame payload budget for ordinary interleaved messages.
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Frame payload budget for urgent messages, or when nothing else is
/// waiting to interleave.
pub const URGENT_FRAME_SIZE: usize = 32_768;

/// WebSocket subprotocol name for this protocol generation.
pub const PROTOCOL_NAME: &str = "BLIP_3";

/// The subprotocol token to negotiate during the transport handshake:
/// `BLIP_3`, or `BLIP_3+<app>` when an application subprotocol is in use.
#[must_use]
pub fn subprotocol_token(app: Option<&str>) -> String {
    match app {
        Some(app) => format!("{PROTOCOL_NAME}+{app}"),
        None => PROTOCOL_NAME.to_string(),
    }
}
