//! Frame header encode/decode.
//!
//! Every frame begins with the message number as a varint followed by one
//! flag byte; everything after that is payload whose shape depends on the
//! message type and the compressed bit.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    FrameFlags, MessageNo, varint,
    errors::{ProtocolError, Result},
};

/// The fixed leading fields of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Number of the message this frame belongs to.
    pub number: MessageNo,
    /// The frame's flag byte.
    pub flags: FrameFlags,
}

impl FrameHeader {
    /// Append the encoded header to `buf`, returning its length.
    pub fn encode(&self, buf: &mut BytesMut) -> usize {
        let len = varint::write(self.number, buf);
        buf.put_u8(self.flags.bits());
        len + 1
    }

    /// Parse the header off the front of `buf`, leaving only the payload.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::TruncatedVarint`] if the number is malformed, or
    /// [`ProtocolError::FrameTruncated`] if the flag byte is missing.
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let number = varint::take(buf)?;
        if buf.is_empty() {
            return Err(ProtocolError::FrameTruncated { expected: 1, actual: 0 });
        }
        let flags = FrameFlags::from_bits(buf[0]);
        bytes::Buf::advance(buf, 1);
        Ok(Self { number, flags })
    }
}
