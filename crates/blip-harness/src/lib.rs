//! In-memory transport harness for engine tests.
//!
//! [`pipe`] builds two connected [`PipeTransport`] halves backed by a
//! pair of bounded frame channels, so two engines can run against each
//! other inside one test without sockets. The bounded channel supplies
//! the outbound back-pressure a real transport would: `send` suspends
//! once the peer is `capacity` frames behind.

use std::cell::{Cell, RefCell};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tracing::trace;

use blip_core::{Transport, TransportError};

/// Default frame capacity per direction; with 32 KiB frames this is about
/// half a megabyte in flight.
pub const DEFAULT_CAPACITY: usize = 16;

/// One end of an in-memory frame pipe.
pub struct PipeTransport {
    /// Sender toward the peer; `None` once closed.
    tx: RefCell<Option<mpsc::Sender<Bytes>>>,
    rx: Mutex<mpsc::Receiver<Bytes>>,
    /// Set once the inbound side has ended (peer closed, or disconnect).
    closed: Cell<bool>,
}

/// Two connected transports, each able to buffer `capacity` frames toward
/// the other.
#[must_use]
pub fn pipe(capacity: usize) -> (PipeTransport, PipeTransport) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    (PipeTransport::new(a_tx, a_rx), PipeTransport::new(b_tx, b_rx))
}

/// [`pipe`] with the default capacity.
#[must_use]
pub fn pair() -> (PipeTransport, PipeTransport) {
    pipe(DEFAULT_CAPACITY)
}

impl PipeTransport {
    fn new(tx: mpsc::Sender<Bytes>, rx: mpsc::Receiver<Bytes>) -> Self {
        Self { tx: RefCell::new(Some(tx)), rx: Mutex::new(rx), closed: Cell::new(false) }
    }
}

#[async_trait(?Send)]
impl Transport for PipeTransport {
    fn can_send(&self) -> bool {
        !self.closed.get() && self.tx.borrow().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn can_receive(&self) -> bool {
        !self.closed.get()
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let Some(tx) = self.tx.borrow().clone() else {
            return Err(TransportError::Closed);
        };
        trace!(len = frame.len(), "pipe send");
        tx.send(Bytes::copy_from_slice(frame)).await.map_err(|_| TransportError::Closed)
    }

    async fn receive(&self) -> Result<Bytes, TransportError> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(frame) => {
                trace!(len = frame.len(), "pipe receive");
                Ok(frame)
            },
            None => {
                // Clean close by the peer: the empty-frame sentinel. Like
                // a WebSocket close handshake this ends both directions,
                // so drop our sender too.
                self.closed.set(true);
                self.tx.borrow_mut().take();
                Ok(Bytes::new())
            },
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Dropping the sender lets already-buffered frames drain before
        // the peer observes the close.
        self.tx.borrow_mut().take();
        Ok(())
    }

    fn disconnect(&self) {
        self.tx.borrow_mut().take();
        self.closed.set(true);
    }
}
