//! The message model.
//!
//! Three types cover a message's life. [`MessageBuf`] is the mutable
//! builder applications fill in. Sending turns it into a [`MessageOut`],
//! which produces wire frames on demand and tracks acknowledgment
//! accounting. On the receiving side a [`MessageIn`] reassembles frames
//! back into properties and body.

mod builder;
mod incoming;
mod outgoing;

pub use builder::MessageBuf;
pub use incoming::MessageIn;
pub use outgoing::MessageOut;

/// Scheduling priority of an outgoing message.
///
/// Urgent messages are sent in larger frames so they drain ahead of
/// ordinary traffic while still interleaving fairly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Priority {
    /// Ordinary interleaved delivery.
    #[default]
    Normal,
    /// Expedited delivery; also set on internal ACK frames.
    Urgent,
}
