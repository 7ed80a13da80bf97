//! Server-side connection handle.
//!
//! A [`Connection`] is what handlers receive as the sender of a message.
//! It does no I/O itself: the per-connection task reads the socket and
//! feeds [`receive`](Connection::receive), and drains the outbound channel
//! returned by [`Connection::new`] into the socket. Handlers on dispatcher
//! worker threads only need [`send_envelope`](Connection::send_envelope),
//! which never blocks.
//!
//! ```text
//! handler ─send_envelope─▶ mpsc ─▶ writer task ─▶ socket
//! socket ─▶ reader task ─receive─▶ FrameDecoder ─▶ Dispatcher::publish
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use gamelink_protocol::{Envelope, FrameDecoder, FrameEncoder, ProtocolError};
use tokio::sync::{Notify, mpsc};

use crate::{ConnectionId, TransportError, WireCodec};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One accepted TCP connection and its per-connection state.
pub struct Connection<S> {
    id: ConnectionId,
    peer_addr: SocketAddr,
    session: Mutex<S>,
    decoder: Mutex<FrameDecoder<WireCodec>>,
    encoder: FrameEncoder<WireCodec>,
    outbound: mpsc::UnboundedSender<Bytes>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl<S: Send + 'static> Connection<S> {
    /// Creates a connection and the receiving half of its outbound queue.
    ///
    /// Whoever owns the socket must drain the receiver into it.
    pub fn new(
        peer_addr: SocketAddr,
        session: S,
        max_frame_size: usize,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Bytes>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            id: ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            peer_addr,
            session: Mutex::new(session),
            decoder: Mutex::new(FrameDecoder::new(WireCodec::default(), max_frame_size)),
            encoder: FrameEncoder::new(WireCodec::default(), max_frame_size),
            outbound,
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        });
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Locks the per-connection session slot.
    ///
    /// Don't hold the guard across a call that might publish back to the
    /// same connection's handlers.
    pub fn session(&self) -> MutexGuard<'_, S> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues pre-framed bytes for transmission.
    ///
    /// # Errors
    /// `ConnectionClosed` once the connection is closed or its writer
    /// task has exited.
    pub fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.send_frame(Bytes::copy_from_slice(data))
    }

    /// Frames and queues one envelope.
    ///
    /// # Errors
    /// `Protocol` if the envelope cannot be encoded within the frame size
    /// limit, otherwise as [`send`](Self::send).
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let frame = self.encoder.encode(envelope)?;
        self.send_frame(frame)
    }

    fn send_frame(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed(self.id.to_string()));
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed(self.id.to_string()))
    }

    /// Feeds received bytes into this connection's framing buffer and
    /// pushes completed envelopes onto `out` in arrival order.
    ///
    /// The buffer is locked for the whole call, so concurrent callers
    /// cannot interleave partial frames.
    pub fn receive(
        &self,
        data: &[u8],
        out: &mut Vec<Envelope>,
    ) -> Result<usize, ProtocolError> {
        self.decoder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .feed(data, out)
    }

    /// Marks the connection closed and wakes its I/O tasks.
    /// Safe to call repeatedly.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.decoder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.close_signal.notify_waiters();
        tracing::debug!(conn_id = %self.id, peer = %self.peer_addr, "connection closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let notified = self.close_signal.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
