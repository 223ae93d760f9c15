//! Incoming message reassembly.

use bytes::{Bytes, BytesMut};
use tokio::sync::oneshot;

use blip_proto::{
    FrameFlags, INCOMING_ACK_THRESHOLD, MessageNo, MessageType, ProtocolError,
    checksum::TRAILER_LEN, properties, varint,
};

use super::MessageOut;
use crate::{
    codec::{CodecMode, Inflater, SYNC_TRAILER},
    error::EngineError,
};

/// Plaintext produced per inflate call before draining into the message.
const DECODE_CHUNK: usize = 32 * 1024;

/// Reassembly progress. The decoded payload starts with a varint property
/// block length, then the block, then body bytes until the final frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum State {
    /// Waiting for the property-block length varint.
    Start,
    /// Copying the property block.
    ReadingProperties,
    /// Everything else is body.
    ReadingBody,
    /// Final frame seen; properties and body are complete.
    Complete,
}

/// A message being received, or a completed one handed to the application.
///
/// Created on the first frame of an incoming request, or pre-registered at
/// send time for an expected response. Frames are fed in arrival order by
/// the engine; once the final frame lands the message is complete and its
/// properties and body become readable.
#[derive(Debug)]
pub struct MessageIn {
    number: MessageNo,
    message_type: MessageType,
    state: State,
    /// Holds leading bytes until the length varint is whole (Start only).
    stage: BytesMut,
    properties_remaining: usize,
    properties: BytesMut,
    body: BytesMut,
    raw_bytes_received: u64,
    unacked_bytes: u64,
    no_reply: bool,
    notifier: Option<oneshot::Sender<MessageIn>>,
}

impl MessageIn {
    /// Empty reassembly state for message `number`.
    #[must_use]
    pub fn new(number: MessageNo, message_type: MessageType) -> Self {
        Self {
            number,
            message_type,
            state: State::Start,
            stage: BytesMut::new(),
            properties_remaining: 0,
            properties: BytesMut::new(),
            body: BytesMut::new(),
            raw_bytes_received: 0,
            unacked_bytes: 0,
            no_reply: false,
            notifier: None,
        }
    }

    /// Reassembly state for an expected response, with the channel that
    /// completes the requester's future.
    #[must_use]
    pub fn with_notifier(
        number: MessageNo,
        message_type: MessageType,
        notifier: oneshot::Sender<MessageIn>,
    ) -> Self {
        let mut msg = Self::new(number, message_type);
        msg.notifier = Some(notifier);
        msg
    }

    /// A synthesized local error delivered to response waiters when the
    /// connection dies before their response arrives.
    pub(crate) fn disconnected(number: MessageNo) -> Self {
        let mut msg = Self::new(number, MessageType::Error);
        properties::encode_pair(
            &mut msg.properties,
            properties::ERROR_CODE,
            &properties::ERROR_DISCONNECTED.to_string(),
        );
        msg.body.extend_from_slice(b"Disconnected");
        msg.state = State::Complete;
        msg
    }

    /// The message number.
    #[must_use]
    pub fn number(&self) -> MessageNo {
        self.number
    }

    /// The message kind. May flip to [`MessageType::Error`] mid-stream if
    /// the responder replaces its response with an error.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Whether the final frame has been received.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    /// Whether this message is an error response.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.message_type == MessageType::Error
    }

    /// Whether the sender declined a response (requests only).
    #[must_use]
    pub fn no_reply(&self) -> bool {
        self.no_reply
    }

    /// Iterate the properties in wire order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &str)> {
        properties::iter(&self.properties)
    }

    /// Value of property `key`, if present.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        properties::get(&self.properties, key)
    }

    /// Value of property `key`, or `default` when absent.
    #[must_use]
    pub fn property_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.property(key).unwrap_or(default)
    }

    /// Integer value of property `key`, or `default` when absent or not
    /// parseable.
    #[must_use]
    pub fn int_property(&self, key: &str, default: i64) -> i64 {
        self.property(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    /// The `Profile` property, naming the request handler.
    #[must_use]
    pub fn profile(&self) -> Option<&str> {
        self.property(properties::PROFILE)
    }

    /// Error domain of an error response; `BLIP` when unspecified.
    #[must_use]
    pub fn error_domain(&self) -> &str {
        self.property_or(properties::ERROR_DOMAIN, properties::BLIP_ERROR_DOMAIN)
    }

    /// Error code of an error response, if present and numeric.
    #[must_use]
    pub fn error_code(&self) -> Option<i64> {
        self.property(properties::ERROR_CODE).and_then(|v| v.parse().ok())
    }

    /// The message body.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Total frame payload bytes received, as reported in ACKs.
    #[must_use]
    pub fn raw_bytes_received(&self) -> u64 {
        self.raw_bytes_received
    }

    pub(crate) fn take_notifier(&mut self) -> Option<oneshot::Sender<MessageIn>> {
        self.notifier.take()
    }

    /// Feed one frame's payload into the reassembly.
    ///
    /// Returns an ACK frame to queue when enough unacknowledged bytes have
    /// accumulated. On the final frame (more-coming clear) the message
    /// becomes complete instead.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::InconsistentMessageType`] if a frame's type
    ///   disagrees with the message's (error takeovers excepted).
    /// - [`ProtocolError::IncompleteProperties`] if the final frame lands
    ///   while the property block is still short.
    /// - [`CodecError`](crate::CodecError) on inflate or checksum failure.
    pub fn add_frame(
        &mut self,
        flags: FrameFlags,
        mut payload: Bytes,
        decode_buf: &mut BytesMut,
        codec: &mut Inflater,
    ) -> Result<Option<MessageOut>, EngineError> {
        self.raw_bytes_received += payload.len() as u64;
        self.unacked_bytes += payload.len() as u64;
        if flags.no_reply() {
            self.no_reply = true;
        }

        let frame_type = flags.message_type()?;
        if frame_type != self.message_type {
            if frame_type == MessageType::Error {
                // The peer replaced its in-progress message with an error;
                // drop whatever was accumulated and start over.
                self.message_type = MessageType::Error;
                self.state = State::Start;
                self.stage.clear();
                self.properties.clear();
                self.properties_remaining = 0;
                self.body.clear();
            } else {
                return Err(ProtocolError::InconsistentMessageType {
                    number: self.number,
                    was: self.message_type,
                    now: frame_type,
                }
                .into());
            }
        }

        if payload.len() < TRAILER_LEN {
            return Err(ProtocolError::FrameTruncated {
                expected: TRAILER_LEN,
                actual: payload.len(),
            }
            .into());
        }
        let trailer = payload.split_off(payload.len() - TRAILER_LEN);
        let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);

        if flags.compressed() {
            while !payload.is_empty() {
                decode_buf.clear();
                codec.write(&mut payload, decode_buf, DECODE_CHUNK, CodecMode::SyncFlush)?;
                self.add_bytes(&decode_buf[..])?;
            }
            // Re-feed the sync marker the checksum displaced so the
            // inflate stream stays aligned with the sender's.
            let mut marker = Bytes::from_static(&SYNC_TRAILER);
            while !marker.is_empty() {
                decode_buf.clear();
                codec.write(&mut marker, decode_buf, DECODE_CHUNK, CodecMode::SyncFlush)?;
                self.add_bytes(&decode_buf[..])?;
            }
        } else {
            while !payload.is_empty() {
                decode_buf.clear();
                codec.write(&mut payload, decode_buf, DECODE_CHUNK, CodecMode::Raw)?;
                self.add_bytes(&decode_buf[..])?;
            }
        }
        codec.verify(expected)?;

        if !flags.more_coming() {
            if self.state < State::ReadingBody {
                return Err(ProtocolError::IncompleteProperties.into());
            }
            self.state = State::Complete;
            return Ok(None);
        }
        if self.unacked_bytes >= INCOMING_ACK_THRESHOLD {
            self.unacked_bytes = 0;
            return Ok(Some(MessageOut::new_ack(
                self.message_type,
                self.number,
                self.raw_bytes_received,
            )));
        }
        Ok(None)
    }

    /// Route decoded plaintext through the property/body state machine.
    fn add_bytes(&mut self, plain: &[u8]) -> Result<(), ProtocolError> {
        if plain.is_empty() {
            return Ok(());
        }
        if self.state == State::Start {
            // The length varint may split across decode chunks.
            self.stage.extend_from_slice(plain);
            match varint::read(&self.stage) {
                Ok((len, consumed)) => {
                    self.properties_remaining = len as usize;
                    // Pre-size from the peer's claim, but never trust it
                    // for more than one chunk's worth up front.
                    self.properties.reserve(self.properties_remaining.min(DECODE_CHUNK));
                    self.state = if len == 0 {
                        State::ReadingBody
                    } else {
                        State::ReadingProperties
                    };
                    let leftover = self.stage.split_off(consumed);
                    self.stage.clear();
                    return self.consume(&leftover);
                },
                Err(ProtocolError::TruncatedVarint) if self.stage.len() < varint::MAX_LEN => {
                    return Ok(());
                },
                Err(e) => return Err(e),
            }
        }
        self.consume(plain)
    }

    fn consume(&mut self, mut data: &[u8]) -> Result<(), ProtocolError> {
        while !data.is_empty() {
            match self.state {
                State::ReadingProperties => {
                    let take = data.len().min(self.properties_remaining);
                    self.properties.extend_from_slice(&data[..take]);
                    self.properties_remaining -= take;
                    data = &data[take..];
                    if self.properties_remaining == 0 {
                        self.state = State::ReadingBody;
                    }
                },
                State::ReadingBody => {
                    self.body.extend_from_slice(data);
                    data = &[];
                },
                State::Start | State::Complete => {
                    unreachable!("plaintext routed while in {:?}", self.state)
                },
            }
        }
        Ok(())
    }
}
