//! Frame flag byte and message-type field.
//!
//! Every frame carries one flag byte after the message number:
//!
//! ```text
//! bit 0-2  message type (REQ=0, RES=1, ERR=2, ACK_REQ=4, ACK_RES=5)
//! bit 3    compressed   payload is a deflate stream
//! bit 4    urgent       scheduling hint
//! bit 5    no-reply     requests only: sender does not want a response
//! bit 6    more-coming  set on every frame of a message except the last
//! bit 7    reserved, sent as 0
//! ```

use std::fmt;

use crate::errors::{ProtocolError, Result};

/// The kind of message a frame belongs to.
///
/// ACK kinds are internal housekeeping frames: they acknowledge received
/// bytes of an in-flight message and are never surfaced as messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// A request, expecting a response unless flagged no-reply.
    Request = 0,
    /// A successful response to a request.
    Response = 1,
    /// An error response to a request.
    Error = 2,
    /// Acknowledges bytes received of an incoming request.
    AckRequest = 4,
    /// Acknowledges bytes received of an incoming response.
    AckResponse = 5,
}

impl MessageType {
    /// Parse the 3-bit wire value.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidMessageType`] for the unassigned values
    /// 3, 6 and 7.
    pub fn from_bits(bits: u8) -> Result<Self> {
        match bits & FrameFlags::TYPE_MASK {
            0 => Ok(Self::Request),
            1 => Ok(Self::Response),
            2 => Ok(Self::Error),
            4 => Ok(Self::AckRequest),
            5 => Ok(Self::AckResponse),
            other => Err(ProtocolError::InvalidMessageType(other)),
        }
    }

    /// The 3-bit wire value.
    #[must_use]
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Whether this is one of the two ACK kinds.
    #[must_use]
    pub fn is_ack(self) -> bool {
        matches!(self, Self::AckRequest | Self::AckResponse)
    }

    /// The ACK kind that acknowledges a message of this type.
    ///
    /// Requests are acknowledged by `ACK_REQ`; responses (successful or
    /// error) by `ACK_RES`. Must not be called on an ACK kind.
    #[must_use]
    pub fn ack_kind(self) -> Self {
        debug_assert!(!self.is_ack());
        match self {
            Self::Request => Self::AckRequest,
            _ => Self::AckResponse,
        }
    }

    /// The message type an ACK of this kind refers to.
    ///
    /// Must only be called on an ACK kind.
    #[must_use]
    pub fn acked_kind(self) -> Self {
        debug_assert!(self.is_ack());
        match self {
            Self::AckRequest => Self::Request,
            _ => Self::Response,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Request => "REQ",
            Self::Response => "RES",
            Self::Error => "ERR",
            Self::AckRequest => "ACK_REQ",
            Self::AckResponse => "ACK_RES",
        };
        f.write_str(name)
    }
}

/// The flag byte of a single frame.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub(crate) const TYPE_MASK: u8 = 0x07;
    const COMPRESSED: u8 = 0x08;
    const URGENT: u8 = 0x10;
    const NO_REPLY: u8 = 0x20;
    const MORE_COMING: u8 = 0x40;

    /// Flags for a message of `message_type` with all option bits clear.
    #[must_use]
    pub fn new(message_type: MessageType) -> Self {
        Self(message_type.bits())
    }

    /// Reconstruct from a raw wire byte. Unknown bits are preserved.
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// The raw wire byte.
    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    /// The 3-bit message type field.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidMessageType`] if the field holds an
    /// unassigned value.
    pub fn message_type(self) -> Result<MessageType> {
        MessageType::from_bits(self.0)
    }

    /// Whether the payload is part of a deflate stream.
    #[must_use]
    pub fn compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    /// Set or clear the compressed bit.
    #[must_use]
    pub fn with_compressed(self, on: bool) -> Self {
        self.with_bit(Self::COMPRESSED, on)
    }

    /// Whether the message asked for expedited delivery.
    #[must_use]
    pub fn urgent(self) -> bool {
        self.0 & Self::URGENT != 0
    }

    /// Set or clear the urgent bit.
    #[must_use]
    pub fn with_urgent(self, on: bool) -> Self {
        self.with_bit(Self::URGENT, on)
    }

    /// Whether the sender declined a response (requests only).
    #[must_use]
    pub fn no_reply(self) -> bool {
        self.0 & Self::NO_REPLY != 0
    }

    /// Set or clear the no-reply bit.
    #[must_use]
    pub fn with_no_reply(self, on: bool) -> Self {
        self.with_bit(Self::NO_REPLY, on)
    }

    /// Whether more frames of this message follow.
    #[must_use]
    pub fn more_coming(self) -> bool {
        self.0 & Self::MORE_COMING != 0
    }

    /// Set or clear the more-coming bit.
    #[must_use]
    pub fn with_more_coming(self, on: bool) -> Self {
        self.with_bit(Self::MORE_COMING, on)
    }

    fn with_bit(self, bit: u8, on: bool) -> Self {
        if on { Self(self.0 | bit) } else { Self(self.0 & !bit) }
    }
}

impl fmt::Debug for FrameFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message_type() {
            Ok(t) => write!(f, "{t}")?,
            Err(_) => write!(f, "TYPE({})", self.0 & Self::TYPE_MASK)?,
        }
        if self.compressed() {
            write!(f, "|Z")?;
        }
        if self.urgent() {
            write!(f, "|URG")?;
        }
        if self.no_reply() {
            write!(f, "|NOREPLY")?;
        }
        if self.more_coming() {
            write!(f, "|MORE")?;
        }
        Ok(())
    }
}
