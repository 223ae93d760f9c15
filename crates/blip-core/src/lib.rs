//! BLIP protocol engine.
//!
//! BLIP multiplexes request/response messaging over a single
//! bidirectional binary-frame transport (typically a WebSocket). Messages
//! carry ordered string properties and an arbitrary body, may be
//! compressed, and are delivered interleaved one frame at a time so a
//! large transfer never blocks small ones. Acknowledgment frames give
//! per-message flow control on top of whatever back-pressure the
//! transport provides.
//!
//! The [`Engine`] is one end of a connection: give it a [`Transport`],
//! register request handlers by profile, and drive it with
//! [`Engine::run`]. Messages are composed with [`MessageBuf`] and arrive
//! as [`MessageIn`].

pub mod codec;
pub mod engine;
pub mod error;
pub mod message;
pub mod outbox;
pub mod transport;

pub use codec::{CodecError, CodecMode, Deflater, Inflater};
pub use engine::{Engine, EngineOptions, ResponseReceiver};
pub use error::{EngineError, HandlerError};
pub use message::{MessageBuf, MessageIn, MessageOut, Priority};
pub use outbox::{Icebox, Outbox};
pub use transport::{Transport, TransportError};
