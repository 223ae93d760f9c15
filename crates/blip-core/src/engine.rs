//! The protocol engine: two cooperative loops around one transport.
//!
//! `send_loop` pops messages off the outbox, emits one frame each, and
//! requeues them, interleaving concurrent messages one frame at a time.
//! `receive_loop` parses incoming frames, feeds per-message reassembly,
//! dispatches completed requests to registered handlers, and completes
//! response futures. Both run joined on a single task, so engine state
//! needs no locks: it is only touched between suspension points.
//!
//! Flow control is ACK-driven. The receiver acknowledges every 50,000
//! unacked bytes of a message; the sender pauses a message in the icebox
//! once 100,000 sent bytes are unacknowledged and resumes it when an ACK
//! brings the count back down.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

use bytes::{Bytes, BytesMut};
use flate2::Compression;
use tracing::{debug, error, trace, warn};

use blip_proto::{
    DEFAULT_FRAME_SIZE, FrameHeader, MessageNo, MessageType, ProtocolError, URGENT_FRAME_SIZE,
    properties,
};

use crate::{
    codec::{Deflater, Inflater},
    error::{EngineError, HandlerError},
    message::{MessageBuf, MessageIn, MessageOut},
    outbox::{Icebox, Outbox},
    transport::Transport,
};

/// Capacity of the reusable outbound frame buffer.
const FRAME_BUF_SIZE: usize = 32 * 1024;

/// Initial capacity of the growable inbound decode buffer.
const DECODE_BUF_SIZE: usize = 32 * 1024;

/// Response future for a sent request.
pub type ResponseReceiver = tokio::sync::oneshot::Receiver<MessageIn>;

type Handler = Box<dyn Fn(&MessageIn) -> Result<MessageBuf, HandlerError>>;

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Deflate level for compressed messages, 0–9. Zero disables
    /// compression for the whole connection: the compressed flag is
    /// cleared off outgoing messages (incoming compressed frames are
    /// still accepted).
    pub compression_level: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { compression_level: 6 }
    }
}

/// One end of a BLIP connection.
///
/// Construct with a connected transport, register request handlers, then
/// drive it with [`run`](Self::run). Requests can be sent before or while
/// `run` executes; frames only move while it does.
pub struct Engine {
    transport: Box<dyn Transport>,
    outbox: Outbox,
    icebox: RefCell<Icebox>,
    state: RefCell<EngineState>,
    handlers: RefCell<HashMap<String, Handler>>,
    default_handler: RefCell<Option<Handler>>,
    close_when_idle: Cell<bool>,
    compression: Option<Compression>,
}

#[derive(Default)]
struct EngineState {
    /// Last request number assigned to an outgoing request.
    out_number: MessageNo,
    /// Highest request number seen from the peer.
    in_number: MessageNo,
    /// Multi-frame incoming requests still being reassembled.
    incoming_requests: HashMap<MessageNo, MessageIn>,
    /// Expected responses, registered when their request is sent.
    incoming_responses: HashMap<MessageNo, MessageIn>,
}

impl Engine {
    /// An engine over `transport`.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, options: EngineOptions) -> Self {
        let compression = match options.compression_level {
            0 => None,
            level => Some(Compression::new(level.min(9))),
        };
        Self {
            transport,
            outbox: Outbox::new(),
            icebox: RefCell::new(Icebox::new()),
            state: RefCell::new(EngineState::default()),
            handlers: RefCell::new(HashMap::new()),
            default_handler: RefCell::new(None),
            close_when_idle: Cell::new(false),
            compression,
        }
    }

    /// Register the handler for requests whose `Profile` property equals
    /// `profile`. Replaces any previous handler for that profile.
    ///
    /// Handlers run inline on the receive loop and must return quickly;
    /// the builder they return is sent as the response (ignored for
    /// no-reply requests). Returning `Err` sends an error response
    /// instead.
    pub fn on_request<F>(&self, profile: &str, handler: F)
    where
        F: Fn(&MessageIn) -> Result<MessageBuf, HandlerError> + 'static,
    {
        self.handlers.borrow_mut().insert(profile.to_string(), Box::new(handler));
    }

    /// Register the fallback handler for profiles with no specific
    /// handler. Without one, such requests are answered with BLIP/404.
    pub fn on_default<F>(&self, handler: F)
    where
        F: Fn(&MessageIn) -> Result<MessageBuf, HandlerError> + 'static,
    {
        *self.default_handler.borrow_mut() = Some(Box::new(handler));
    }

    /// Queue a request for sending.
    ///
    /// Assigns the next message number and, unless the request is marked
    /// no-reply, returns a future that resolves with the response (an
    /// error message with BLIP/502 if the connection dies first).
    ///
    /// # Errors
    ///
    /// [`EngineError::Closed`] if the engine has shut down.
    ///
    /// # Panics
    ///
    /// Panics if the builder is not a request.
    pub fn send_request(
        &self,
        mut msg: MessageBuf,
    ) -> Result<Option<ResponseReceiver>, EngineError> {
        assert_eq!(msg.message_type(), MessageType::Request, "send_request takes requests");
        if self.compression.is_none() {
            msg.compressed = false;
        }

        let (number, receiver) = {
            let mut state = self.state.borrow_mut();
            state.out_number += 1;
            let number = state.out_number;
            let receiver = if msg.no_reply {
                None
            } else {
                let (tx, rx) = tokio::sync::oneshot::channel();
                let pending = MessageIn::with_notifier(number, MessageType::Response, tx);
                state.incoming_responses.insert(number, pending);
                Some(rx)
            };
            (number, receiver)
        };

        let out = Rc::new(RefCell::new(MessageOut::new(number, &msg)));
        if !self.outbox.push(out) {
            self.state.borrow_mut().incoming_responses.remove(&number);
            return Err(EngineError::Closed);
        }
        trace!(number, "queued request");
        Ok(receiver)
    }

    /// Queue a response built outside a request handler. The builder must
    /// have been addressed with [`MessageBuf::respond_to`].
    ///
    /// # Errors
    ///
    /// [`EngineError::Closed`] if the engine has shut down.
    ///
    /// # Panics
    ///
    /// Panics if the builder is a request or names no request number.
    pub fn send_response(&self, msg: MessageBuf) -> Result<(), EngineError> {
        assert_ne!(msg.message_type(), MessageType::Request, "send_response takes responses");
        assert!(msg.response_to > 0, "response must name the request it answers");
        let number = msg.response_to;
        if self.queue_reply(number, msg) { Ok(()) } else { Err(EngineError::Closed) }
    }

    /// Ask the engine to shut down once no messages are pending in either
    /// direction. In-flight requests and responses still complete.
    pub fn close_when_idle(&self) {
        self.close_when_idle.set(true);
        self.maybe_close_outbox();
    }

    /// Run the engine until the connection ends.
    ///
    /// Completes when both loops have stopped: after a clean shutdown via
    /// [`close_when_idle`](Self::close_when_idle), a peer close, or a
    /// fatal error.
    pub async fn run(&self) {
        debug!("engine running");
        tokio::join!(self.send_loop(), self.receive_loop());
        debug!("engine stopped");
    }

    /// True when no message is pending in either direction.
    fn is_idle(&self) -> bool {
        let state = self.state.borrow();
        state.incoming_requests.is_empty()
            && state.incoming_responses.is_empty()
            && self.outbox.is_empty()
            && self.icebox.borrow().is_empty()
    }

    /// Close the outbox if a requested idle shutdown has become possible.
    /// Closing it makes the send loop finish, which closes the transport.
    fn maybe_close_outbox(&self) {
        if self.close_when_idle.get() && !self.outbox.is_closed() && self.is_idle() {
            debug!("engine idle; shutting down");
            self.outbox.close();
        }
    }

    async fn send_loop(&self) {
        let mut codec = Deflater::new(self.compression.unwrap_or_else(Compression::none));
        let mut frame = BytesMut::with_capacity(FRAME_BUF_SIZE);

        loop {
            self.maybe_close_outbox();
            let Some(msg) = self.outbox.pop().await else { break };
            if !self.transport.can_send() {
                debug!("transport cannot send; stopping");
                break;
            }

            // Urgent messages (and lone ones, with nothing to interleave
            // against) get the big frame size.
            // TODO: evaluate also placing urgent messages nearer the queue
            // head, behind in-flight ACKs.
            let frame_size = if msg.borrow().urgent() || self.outbox.is_empty() {
                URGENT_FRAME_SIZE
            } else {
                DEFAULT_FRAME_SIZE
            };

            if let Err(e) = msg.borrow_mut().next_frame(&mut frame, frame_size, &mut codec) {
                error!(error = %e, "frame encoding failed; disconnecting");
                self.transport.disconnect();
                break;
            }
            {
                let m = msg.borrow();
                trace!(number = m.number(), len = frame.len(), finished = m.finished(), "sending frame");
            }

            // Requeue before suspending on the send so the engine never
            // looks idle while a message still has frames left.
            if !msg.borrow().finished() {
                if msg.borrow().needs_ack() {
                    debug!(number = msg.borrow().number(), "pausing message until ACK");
                    self.icebox.borrow_mut().add(msg);
                } else {
                    self.outbox.push(msg);
                }
            }

            if let Err(e) = self.transport.send(&frame).await {
                debug!(error = %e, "send failed; stopping");
                break;
            }
        }

        if self.close_when_idle.get() {
            let _ = self.transport.close().await;
        }
        debug!("send loop exited");
    }

    async fn receive_loop(&self) {
        let mut codec = Inflater::new();
        let mut decode_buf = BytesMut::with_capacity(DECODE_BUF_SIZE);

        loop {
            if !self.transport.can_receive() {
                debug!("transport cannot receive; stopping");
                break;
            }
            let frame = match self.transport.receive().await {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(error = %e, "receive failed; stopping");
                    break;
                },
            };
            if frame.is_empty() {
                debug!("peer closed the connection");
                break;
            }
            if let Err(e) = self.handle_frame(frame, &mut decode_buf, &mut codec) {
                error!(error = %e, "protocol failure; closing connection");
                let _ = self.transport.close().await;
                break;
            }
            self.maybe_close_outbox();
        }

        // The connection is over: fail every outstanding response and
        // unpark the send loop so it can finish too.
        self.cancel_pending_responses();
        self.outbox.close();
        debug!("receive loop exited");
    }

    fn handle_frame(
        &self,
        frame: Bytes,
        decode_buf: &mut BytesMut,
        codec: &mut Inflater,
    ) -> Result<(), EngineError> {
        let mut payload = frame;
        let header = FrameHeader::decode(&mut payload)?;
        let msg_type = header.flags.message_type()?;
        trace!(number = header.number, flags = ?header.flags, len = payload.len(), "received frame");

        match msg_type {
            MessageType::Request | MessageType::Response | MessageType::Error => {
                self.handle_data_frame(header, msg_type, payload, decode_buf, codec)
            },
            MessageType::AckRequest | MessageType::AckResponse => {
                self.handle_ack_frame(msg_type, header.number, &payload)
            },
        }
    }

    /// Route one REQ/RES/ERR frame into its reassembly state, creating or
    /// retiring that state per the message-number discipline.
    fn handle_data_frame(
        &self,
        header: FrameHeader,
        msg_type: MessageType,
        payload: Bytes,
        decode_buf: &mut BytesMut,
        codec: &mut Inflater,
    ) -> Result<(), EngineError> {
        let number = header.number;
        let more_coming = header.flags.more_coming();

        let mut msg = {
            let mut state = self.state.borrow_mut();
            match msg_type {
                MessageType::Request => {
                    if number == state.in_number + 1 {
                        // A new request; numbers must arrive in sequence.
                        state.in_number = number;
                        MessageIn::new(number, MessageType::Request)
                    } else if number <= state.in_number {
                        state
                            .incoming_requests
                            .remove(&number)
                            .ok_or(ProtocolError::DuplicateMessageNumber(number))?
                    } else {
                        return Err(ProtocolError::MessageNumberOutOfOrder {
                            number,
                            highest: state.in_number,
                        }
                        .into());
                    }
                },
                _ => state
                    .incoming_responses
                    .remove(&number)
                    .ok_or(ProtocolError::UnknownResponseNumber(number))?,
            }
        };

        let ack = msg.add_frame(header.flags, payload, decode_buf, codec)?;
        if let Some(ack) = ack {
            trace!(number, received = msg.raw_bytes_received(), "acknowledging");
            if !self.outbox.push(Rc::new(RefCell::new(ack))) {
                trace!(number, "dropping ACK; outbox closed");
            }
        }

        if more_coming {
            let mut state = self.state.borrow_mut();
            match msg_type {
                MessageType::Request => state.incoming_requests.insert(number, msg),
                _ => state.incoming_responses.insert(number, msg),
            };
            return Ok(());
        }

        match msg_type {
            MessageType::Request => self.dispatch_request(&msg),
            _ => {
                if let Some(notifier) = msg.take_notifier() {
                    // The requester may have dropped its future; that is
                    // not an error.
                    let _ = notifier.send(msg);
                }
            },
        }
        Ok(())
    }

    /// Invoke the handler for a completed request and queue its response.
    fn dispatch_request(&self, msg: &MessageIn) {
        let number = msg.number();
        let no_reply = msg.no_reply();
        let profile = msg.profile().unwrap_or("").to_string();

        let handlers = self.handlers.borrow();
        let default = self.default_handler.borrow();
        let Some(handler) = handlers.get(profile.as_str()).or(default.as_ref()) else {
            drop(handlers);
            drop(default);
            if no_reply {
                warn!(number, profile = %profile, "no handler for no-reply request");
            } else {
                warn!(number, profile = %profile, "no handler; replying 404");
                self.queue_reply(
                    number,
                    MessageBuf::error(
                        properties::BLIP_ERROR_DOMAIN,
                        properties::ERROR_NO_HANDLER,
                        "No handler",
                    ),
                );
            }
            return;
        };

        let result = handler(msg);
        drop(handlers);
        drop(default);

        match result {
            Ok(reply) => {
                if !no_reply {
                    self.queue_reply(number, reply);
                }
            },
            Err(e) => {
                warn!(number, error = %e, "handler failed");
                if !no_reply {
                    self.queue_reply(number, MessageBuf::error(&e.domain, e.code, &e.message));
                }
            },
        }
    }

    /// Queue a reply to request `number`. Returns `false` when the engine
    /// is already shut down.
    fn queue_reply(&self, number: MessageNo, mut reply: MessageBuf) -> bool {
        debug_assert_ne!(reply.message_type(), MessageType::Request);
        if self.compression.is_none() {
            reply.compressed = false;
        }
        let out = Rc::new(RefCell::new(MessageOut::new(number, &reply)));
        let pushed = self.outbox.push(out);
        if !pushed {
            trace!(number, "dropping reply; outbox closed");
        }
        pushed
    }

    /// Apply an incoming ACK to the outgoing message it names, thawing it
    /// from the icebox when enough bytes have been acknowledged.
    fn handle_ack_frame(
        &self,
        kind: MessageType,
        number: MessageNo,
        body: &[u8],
    ) -> Result<(), EngineError> {
        let target = kind.acked_kind();

        if let Some(msg) = self.outbox.find(target, number) {
            msg.borrow_mut().handle_ack(body)?;
            return Ok(());
        }

        let position = self.icebox.borrow().position(target, number);
        if let Some(index) = position {
            let thaw = {
                let icebox = self.icebox.borrow();
                let msg = icebox.get(index);
                msg.borrow_mut().handle_ack(body)?;
                let needs_ack = msg.borrow().needs_ack();
                !needs_ack
            };
            if thaw {
                let msg = self.icebox.borrow_mut().remove(index);
                debug!(number, "resuming message after ACK");
                if !self.outbox.push(msg) {
                    trace!(number, "dropping thawed message; outbox closed");
                }
            }
            return Ok(());
        }

        // Probably an ACK for a message that finished in the meantime.
        warn!(number, %kind, "ACK for unknown message");
        Ok(())
    }

    /// Fail every outstanding response future with BLIP/502.
    fn cancel_pending_responses(&self) {
        let pending: Vec<MessageIn> = {
            let mut state = self.state.borrow_mut();
            state.incoming_responses.drain().map(|(_, msg)| msg).collect()
        };
        if pending.is_empty() {
            return;
        }
        debug!(count = pending.len(), "cancelling pending responses");
        for mut msg in pending {
            let number = msg.number();
            if let Some(notifier) = msg.take_notifier() {
                let _ = notifier.send(MessageIn::disconnected(number));
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Engine")
            .field("out_number", &state.out_number)
            .field("in_number", &state.in_number)
            .field("pending_responses", &state.incoming_responses.len())
            .field("close_when_idle", &self.close_when_idle.get())
            .finish_non_exhaustive()
    }
}
