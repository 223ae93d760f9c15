//! Outgoing message state.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use blip_proto::{
    FrameFlags, MessageNo, MessageType, OUTGOING_ACK_THRESHOLD, ProtocolError, varint,
};

use super::{MessageBuf, Priority};
use crate::codec::{CodecError, CodecMode, Deflater};

/// A message in flight on the sending side.
///
/// Created when a builder is handed to the engine; lives until its payload
/// has been fully framed (and, for requests expecting a response, until
/// that response arrives — tracked separately by the engine). Frames are
/// produced on demand by [`next_frame`](Self::next_frame), each picking up
/// where the previous one stopped, which is what lets the outbox
/// interleave frames of concurrent messages.
#[derive(Debug)]
pub struct MessageOut {
    number: MessageNo,
    message_type: MessageType,
    flags: FrameFlags,
    priority: Priority,
    /// Encoded payload still to send; the front advances as frames go out.
    payload: Bytes,
    bytes_sent: u64,
    unacked_bytes: u64,
}

impl MessageOut {
    /// Wrap a finished builder for sending as message `number`.
    #[must_use]
    pub fn new(number: MessageNo, buf: &MessageBuf) -> Self {
        debug_assert!(!buf.message_type.is_ack());
        let flags = FrameFlags::new(buf.message_type)
            .with_compressed(buf.compressed)
            .with_urgent(buf.priority == Priority::Urgent)
            .with_no_reply(buf.no_reply && buf.message_type == MessageType::Request);
        Self {
            number,
            message_type: buf.message_type,
            flags,
            priority: buf.priority,
            payload: buf.encode_payload(),
            bytes_sent: 0,
            unacked_bytes: 0,
        }
    }

    /// An internal ACK frame reporting `received` bytes of incoming
    /// message `number` of type `acked`.
    #[must_use]
    pub fn new_ack(acked: MessageType, number: MessageNo, received: u64) -> Self {
        let kind = acked.ack_kind();
        let mut payload = BytesMut::with_capacity(varint::MAX_LEN);
        varint::write(received, &mut payload);
        Self {
            number,
            message_type: kind,
            flags: FrameFlags::new(kind).with_urgent(true).with_no_reply(true),
            priority: Priority::Urgent,
            payload: payload.freeze(),
            bytes_sent: 0,
            unacked_bytes: 0,
        }
    }

    /// The message number frames will carry.
    #[must_use]
    pub fn number(&self) -> MessageNo {
        self.number
    }

    /// The message kind.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Whether this is an internal ACK frame.
    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.message_type.is_ack()
    }

    /// Whether the message asked for expedited delivery.
    #[must_use]
    pub fn urgent(&self) -> bool {
        self.priority == Priority::Urgent
    }

    /// Whether the whole payload has been framed.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload bytes framed so far.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Payload bytes framed but not yet acknowledged by the peer.
    #[must_use]
    pub fn unacked_bytes(&self) -> u64 {
        self.unacked_bytes
    }

    /// Whether sending must pause until the peer acknowledges more bytes.
    #[must_use]
    pub fn needs_ack(&self) -> bool {
        self.unacked_bytes >= OUTGOING_ACK_THRESHOLD
    }

    /// Emit the next frame into `frame` (cleared first), writing at most
    /// `max_frame_size` bytes.
    ///
    /// ACK frames are written verbatim in one piece. Data frames run the
    /// remaining payload through `codec`, compressed or raw per the
    /// message flags, and set the more-coming bit when payload is left
    /// over.
    ///
    /// # Errors
    ///
    /// [`CodecError`] if compression fails; the message is left unusable
    /// and the connection must close.
    pub fn next_frame(
        &mut self,
        frame: &mut BytesMut,
        max_frame_size: usize,
        codec: &mut Deflater,
    ) -> Result<(), CodecError> {
        frame.clear();
        varint::write(self.number, frame);
        let flags_pos = frame.len();
        frame.put_u8(0);

        if self.is_ack() {
            frame.extend_from_slice(&self.payload);
            self.payload.advance(self.payload.len());
            frame[flags_pos] = self.flags.bits();
            return Ok(());
        }

        let budget = max_frame_size.saturating_sub(frame.len());
        let before = frame.len();
        let mode =
            if self.flags.compressed() { CodecMode::SyncFlush } else { CodecMode::Raw };
        codec.write(&mut self.payload, frame, budget, mode)?;
        let produced = (frame.len() - before) as u64;

        let flags = self.flags.with_more_coming(!self.payload.is_empty());
        frame[flags_pos] = flags.bits();

        self.bytes_sent += produced;
        self.unacked_bytes += produced;
        Ok(())
    }

    /// Apply a received ACK: the body is a varint of the payload bytes the
    /// peer has seen.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::TruncatedVarint`] if the ACK body is malformed.
    pub fn handle_ack(&mut self, body: &[u8]) -> Result<(), ProtocolError> {
        let (acked, _) = varint::read(body)?;
        self.unacked_bytes = self.unacked_bytes.min(self.bytes_sent.saturating_sub(acked));
        Ok(())
    }
}
