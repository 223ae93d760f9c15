//! Scheduling queues for outgoing messages.
//!
//! The [`Outbox`] is the round-robin heart of the multiplexer: the send
//! loop pops a message, emits one frame, and pushes the message back,
//! so concurrent messages interleave one frame at a time. Two twists:
//! internal ACK frames jump to the *front* so flow-control feedback is
//! never stuck behind bulk data, and messages that hit the unacked-byte
//! ceiling move aside into the [`Icebox`] until the peer acknowledges.

use std::{
    cell::RefCell,
    collections::VecDeque,
    future::poll_fn,
    rc::Rc,
    task::{Poll, Waker},
};

use blip_proto::{MessageNo, MessageType};

use crate::message::MessageOut;

/// Queued messages are shared between the queues and the send loop.
pub type SharedMessageOut = Rc<RefCell<MessageOut>>;

/// FIFO of messages with frames left to send.
///
/// Single consumer: at most one task may be parked in [`pop`](Self::pop)
/// at a time, which holds by construction since only the engine's send
/// loop pops.
#[derive(Default)]
pub struct Outbox {
    inner: RefCell<Inner>,
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<SharedMessageOut>,
    closed: bool,
    waiter: Option<Waker>,
}

impl Outbox {
    /// An open, empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message: ACKs at the front, everything else at the back.
    /// Wakes a parked `pop`.
    ///
    /// Returns `false` without queueing when the outbox is closed.
    pub fn push(&self, msg: SharedMessageOut) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            return false;
        }
        debug_assert!(
            !inner.queue.iter().any(|m| Rc::ptr_eq(m, &msg)),
            "message is already queued"
        );
        if msg.borrow().is_ack() {
            inner.queue.push_front(msg);
        } else {
            inner.queue.push_back(msg);
        }
        if let Some(waiter) = inner.waiter.take() {
            waiter.wake();
        }
        true
    }

    /// Dequeue the head message, waiting for one to be pushed.
    ///
    /// Resolves to `None` once the outbox is closed.
    pub async fn pop(&self) -> Option<SharedMessageOut> {
        poll_fn(|cx| {
            let mut inner = self.inner.borrow_mut();
            if let Some(msg) = inner.queue.pop_front() {
                return Poll::Ready(Some(msg));
            }
            if inner.closed {
                return Poll::Ready(None);
            }
            inner.waiter = Some(cx.waker().clone());
            Poll::Pending
        })
        .await
    }

    /// Locate a queued message by type and number (used to route incoming
    /// ACKs to messages still waiting to send more frames).
    #[must_use]
    pub fn find(&self, message_type: MessageType, number: MessageNo) -> Option<SharedMessageOut> {
        self.inner
            .borrow()
            .queue
            .iter()
            .find(|m| {
                let m = m.borrow();
                m.message_type() == message_type && m.number() == number
            })
            .cloned()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().queue.is_empty()
    }

    /// Whether the outbox has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    /// Close the outbox: drop everything queued, refuse further pushes,
    /// and resolve a parked `pop` with `None`.
    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.closed = true;
        inner.queue.clear();
        if let Some(waiter) = inner.waiter.take() {
            waiter.wake();
        }
    }
}

/// Messages paused until the peer acknowledges bytes in flight.
///
/// Membership is unordered; a message thaws (moves back to the outbox)
/// when an ACK drops its unacked count below the ceiling.
#[derive(Default)]
pub struct Icebox {
    frozen: Vec<SharedMessageOut>,
}

impl Icebox {
    /// An empty icebox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Freeze a message.
    pub fn add(&mut self, msg: SharedMessageOut) {
        debug_assert!(
            !self.frozen.iter().any(|m| Rc::ptr_eq(m, &msg)),
            "message is already frozen"
        );
        self.frozen.push(msg);
    }

    /// Index of the frozen message with this type and number, if any.
    #[must_use]
    pub fn position(&self, message_type: MessageType, number: MessageNo) -> Option<usize> {
        self.frozen.iter().position(|m| {
            let m = m.borrow();
            m.message_type() == message_type && m.number() == number
        })
    }

    /// The frozen message at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> &SharedMessageOut {
        &self.frozen[index]
    }

    /// Remove and return the message at `index`.
    pub fn remove(&mut self, index: usize) -> SharedMessageOut {
        self.frozen.swap_remove(index)
    }

    /// Whether nothing is frozen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frozen.is_empty()
    }
}
