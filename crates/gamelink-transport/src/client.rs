//! Tick-driven client transport.
//!
//! A game client runs one loop per frame. [`ClientTransport`] does all of
//! its network work inside [`tick`](ClientTransport::tick), with
//! non-blocking socket calls, so the host never needs a network thread:
//!
//! ```text
//! tick():
//!   1. keep connected   reconnect if disconnected and retries remain
//!   2. receive          one read → FrameDecoder → Dispatcher::publish
//!   3. send             flush queued frames until WouldBlock
//!   4. distribute       run subscribed handlers on this thread
//! ```
//!
//! # State machine
//!
//! ```text
//!              connect()             success
//! Disconnected ─────────▶ Connecting ─────────▶ Connected
//!      ▲                      │                     │
//!      └──── failure ─────────┘                     │
//!      └──────────────── close_connection() ────────┘
//! ```
//!
//! The connect itself is the one blocking call, bounded by
//! [`ClientConfig::connect_timeout`]; `Connecting` is only observable
//! from inside it.
//!
//! # Events
//!
//! Connect results and disconnects are queued as [`ClientEvent`]s and
//! drained by the host after each tick. Nothing calls back into host code
//! from inside the transport.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use gamelink_dispatch::{DispatchError, Dispatcher};
use gamelink_protocol::{Envelope, FrameDecoder, FrameEncoder};
use rand::Rng;
use tracing::{debug, error, info, trace, warn};

use crate::{ClientConfig, CloseReason, TransportError, WireCodec};

// ---------------------------------------------------------------------------
// State & events
// ---------------------------------------------------------------------------

/// Connection lifecycle of a [`ClientTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Outcome carried by [`ClientEvent::Connected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectResult {
    Success,
    Failed,
}

impl ConnectResult {
    /// Numeric result: 0 for success, 1 for failure.
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failed => 1,
        }
    }
}

/// Something the host should react to, drained with
/// [`ClientTransport::poll_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A connect attempt succeeded, or the retry budget ran out.
    Connected { result: ConnectResult, reason: String },
    /// An open connection was closed.
    Disconnected { code: i32, reason: String },
}

// ---------------------------------------------------------------------------
// ClientTransport
// ---------------------------------------------------------------------------

/// Owns one connection to a server plus its outbound queue.
///
/// Received messages are published to the shared dispatcher with the
/// server's address as the sender and distributed at the end of each tick.
pub struct ClientTransport {
    config: ClientConfig,
    dispatcher: Arc<Dispatcher<SocketAddr>>,
    address: Option<SocketAddr>,
    stream: Option<TcpStream>,
    state: ConnectionState,
    running: bool,

    retry_count: u32,
    backoff_attempt: u32,
    reconnect_at: Option<Instant>,

    encoder: FrameEncoder<WireCodec>,
    decoder: FrameDecoder<WireCodec>,
    recv_buffer: Box<[u8]>,

    send_queue: VecDeque<Envelope>,
    /// Encoded frame of `send_queue.front()` and how much of it is written.
    in_flight: Option<Bytes>,
    send_offset: usize,

    events: VecDeque<ClientEvent>,
}

impl ClientTransport {
    pub fn new(config: ClientConfig, dispatcher: Arc<Dispatcher<SocketAddr>>) -> Self {
        let config = config.validated();
        Self {
            encoder: FrameEncoder::new(WireCodec::default(), config.max_frame_size),
            decoder: FrameDecoder::new(WireCodec::default(), config.max_frame_size),
            recv_buffer: vec![0u8; config.recv_buffer_size].into_boxed_slice(),
            config,
            dispatcher,
            address: None,
            stream: None,
            state: ConnectionState::Disconnected,
            running: true,
            retry_count: 0,
            backoff_attempt: 0,
            reconnect_at: None,
            send_queue: VecDeque::new(),
            in_flight: None,
            send_offset: 0,
            events: VecDeque::new(),
        }
    }

    /// Records the server address. Does not connect.
    ///
    /// # Errors
    /// - `AlreadyActive` while a socket is open.
    /// - `AddressResolution` if `addr` does not resolve.
    pub fn init(&mut self, addr: &str) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Err(TransportError::AlreadyActive);
        }
        let resolved = addr
            .to_socket_addrs()
            .map_err(|source| TransportError::AddressResolution {
                addr: addr.to_string(),
                source,
            })?
            .next()
            .ok_or_else(|| TransportError::AddressResolution {
                addr: addr.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
            })?;

        debug!(server = %resolved, "client transport initialized");
        self.address = Some(resolved);
        Ok(())
    }

    // -- Connection lifecycle ---------------------------------------------

    /// Connects to the configured server, starting a fresh retry budget.
    ///
    /// No-op while connecting or connected. A failed attempt is reported
    /// through events, not the return value: the next ticks keep retrying
    /// until [`ClientConfig::retry_limit`] consecutive attempts have
    /// failed.
    ///
    /// # Errors
    /// - `NotInitialized` before [`init`](Self::init).
    /// - `Shutdown` after a fatal close or [`shutdown`](Self::shutdown).
    pub fn connect(&mut self) -> Result<(), TransportError> {
        let addr = self.address.ok_or(TransportError::NotInitialized)?;
        if !self.running {
            return Err(TransportError::Shutdown);
        }
        if self.state != ConnectionState::Disconnected {
            return Ok(());
        }
        self.retry_count = 0;
        self.backoff_attempt = 0;
        self.reconnect_at = None;
        self.attempt_connect(addr);
        Ok(())
    }

    fn attempt_connect(&mut self, addr: SocketAddr) {
        self.drop_stream();
        self.state = ConnectionState::Connecting;
        debug!(server = %addr, attempt = self.retry_count + 1, "connecting");

        match open_stream(addr, self.config.connect_timeout) {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = ConnectionState::Connected;
                self.retry_count = 0;
                self.backoff_attempt = 0;
                self.reconnect_at = None;
                info!(server = %addr, "connected");
                self.events.push_back(ClientEvent::Connected {
                    result: ConnectResult::Success,
                    reason: "Success".to_string(),
                });
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                self.retry_count += 1;
                warn!(
                    server = %addr,
                    attempt = self.retry_count,
                    limit = self.config.retry_limit,
                    error = %e,
                    "connect failed"
                );
                if self.retry_count >= self.config.retry_limit {
                    self.reconnect_at = None;
                    self.events.push_back(ClientEvent::Connected {
                        result: ConnectResult::Failed,
                        reason: "Cannot connect to server".to_string(),
                    });
                } else if self.backoff_attempt > 0 {
                    self.schedule_reconnect();
                }
            }
        }
    }

    /// Sets the next automatic attempt after an exponential delay:
    /// `base * 2^n`, capped at the max, plus up to 25% random jitter.
    fn schedule_reconnect(&mut self) {
        let delay = backoff_delay(
            self.config.reconnect_backoff_base,
            self.config.reconnect_backoff_max,
            self.backoff_attempt,
        );
        self.backoff_attempt = self.backoff_attempt.saturating_add(1);
        self.reconnect_at = Some(Instant::now() + delay);
        debug!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
    }

    /// Closes the connection and classifies `reason`.
    ///
    /// Clears the framing buffer, the outbound queue, and the
    /// dispatcher's queue. Then:
    /// - a fatal reason stops the transport;
    /// - a reconnect-eligible reason schedules a backoff reconnect;
    /// - anything else queues a [`ClientEvent::Disconnected`].
    ///
    /// Closing a transport with no open socket raises no event.
    pub fn close_connection(&mut self, reason: CloseReason) {
        let was_open = self.stream.is_some();
        self.drop_stream();
        self.state = ConnectionState::Disconnected;
        self.clear_buffers();

        if reason.is_fatal() {
            if self.running {
                error!(code = reason.code(), %reason, "fatal close, transport stopped");
            }
            self.running = false;
            return;
        }
        if !was_open {
            debug!(code = reason.code(), "close on a closed transport ignored");
            return;
        }

        if reason.is_reconnect_eligible() && self.address.is_some() {
            warn!(code = reason.code(), %reason, "connection lost, will reconnect");
            self.schedule_reconnect();
        } else {
            warn!(code = reason.code(), %reason, "connection closed");
            self.events.push_back(ClientEvent::Disconnected {
                code: reason.code(),
                reason: reason.reason().to_string(),
            });
        }
    }

    /// Returns the transport to its just-initialized state: closes any
    /// socket silently and clears queues, retries, backoff and events.
    /// The address and the running flag are kept.
    pub fn reset(&mut self) {
        self.drop_stream();
        self.state = ConnectionState::Disconnected;
        self.clear_buffers();
        self.retry_count = 0;
        self.backoff_attempt = 0;
        self.reconnect_at = None;
        self.events.clear();
    }

    /// Closes with [`CloseReason::OnDestroy`] and stops the transport.
    pub fn shutdown(&mut self) {
        self.close_connection(CloseReason::OnDestroy);
        self.running = false;
        info!("client transport shut down");
    }

    fn drop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            // The peer may already be gone.
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn clear_buffers(&mut self) {
        self.decoder.clear();
        self.send_queue.clear();
        self.in_flight = None;
        self.send_offset = 0;
        self.dispatcher.clear();
    }

    // -- Sending ----------------------------------------------------------

    /// Queues an envelope for the next tick.
    ///
    /// Dropped if the transport is stopped. If not connected, the
    /// envelope stays queued and a connection attempt starts.
    pub fn send_message(&mut self, envelope: Envelope) {
        if !self.running {
            debug!(message_type = envelope.message_type(), "transport stopped, message dropped");
            return;
        }
        self.send_queue.push_back(envelope);
        if self.state == ConnectionState::Disconnected {
            if let Err(e) = self.connect() {
                warn!(error = %e, "cannot connect to send queued message");
            }
        }
    }

    // -- Tick -------------------------------------------------------------

    /// Runs one cooperative I/O step. Call once per frame.
    ///
    /// Returns how many received messages were distributed.
    ///
    /// # Errors
    /// Only in strict dispatcher mode: the first handler failure.
    pub fn tick(&mut self) -> Result<usize, DispatchError> {
        if !self.running {
            return Ok(0);
        }
        self.keep_connected();
        if self.state == ConnectionState::Connected {
            self.process_recv();
        }
        if self.state == ConnectionState::Connected {
            self.process_send();
        }
        self.dispatcher.distribute()
    }

    fn keep_connected(&mut self) {
        if self.state != ConnectionState::Disconnected {
            return;
        }
        let Some(addr) = self.address else {
            return;
        };
        if self.retry_count >= self.config.retry_limit {
            return;
        }
        if let Some(at) = self.reconnect_at {
            if Instant::now() < at {
                return;
            }
        }
        self.attempt_connect(addr);
    }

    fn process_recv(&mut self) {
        let (Some(stream), Some(server)) = (self.stream.as_mut(), self.address) else {
            return;
        };
        match stream.take_error() {
            Ok(None) => {}
            Ok(Some(e)) | Err(e) => {
                warn!(error = %e, "socket error");
                self.close_connection(CloseReason::SendException);
                return;
            }
        }

        let read = stream.read(&mut self.recv_buffer);
        let n = match read {
            Ok(0) => {
                self.close_connection(CloseReason::ZeroByte);
                return;
            }
            Ok(n) => n,
            Err(e) if is_transient(&e) => return,
            Err(e) => {
                warn!(error = %e, "receive failed");
                self.close_connection(CloseReason::SendException);
                return;
            }
        };
        trace!(bytes = n, "received");

        let mut decoded = Vec::new();
        let result = self.decoder.feed(&self.recv_buffer[..n], &mut decoded);
        for envelope in decoded {
            self.dispatcher.publish(server, envelope);
        }

        if let Err(e) = result {
            // Deliver what arrived intact before tearing down.
            if let Err(dispatch_err) = self.dispatcher.distribute() {
                warn!(error = %dispatch_err, "handler failed while closing");
            }
            if e.is_fatal() {
                error!(error = %e, "framing violation");
                self.close_connection(CloseReason::UnknownProtocol);
            } else {
                warn!(error = %e, "undecodable package");
                self.close_connection(CloseReason::IllegalPackage);
            }
        }
    }

    fn process_send(&mut self) {
        loop {
            if self.in_flight.is_none() {
                let Some(envelope) = self.send_queue.front() else {
                    return;
                };
                match self.encoder.encode(envelope) {
                    Ok(frame) => {
                        self.in_flight = Some(frame);
                        self.send_offset = 0;
                    }
                    Err(e) => {
                        error!(
                            message_type = envelope.message_type(),
                            error = %e,
                            "cannot encode message, dropped"
                        );
                        self.send_queue.pop_front();
                        continue;
                    }
                }
            }

            let (Some(stream), Some(frame)) = (self.stream.as_mut(), self.in_flight.as_ref())
            else {
                return;
            };
            let len = frame.len();
            match stream.write(&frame[self.send_offset..]) {
                Ok(0) => {
                    self.close_connection(CloseReason::ZeroByte);
                    return;
                }
                Ok(n) => {
                    self.send_offset += n;
                    if self.send_offset >= len {
                        trace!(bytes = len, "frame sent");
                        self.in_flight = None;
                        self.send_offset = 0;
                        self.send_queue.pop_front();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    let e = TransportError::SendFailed(e);
                    warn!(error = %e, "send failed");
                    self.close_connection(CloseReason::SendException);
                    return;
                }
            }
        }
    }

    // -- Events & accessors -----------------------------------------------

    pub fn poll_event(&mut self) -> Option<ClientEvent> {
        self.events.pop_front()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.events.drain(..)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Consecutive failed connect attempts.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Envelopes queued, including one partially written.
    pub fn pending_sends(&self) -> usize {
        self.send_queue.len()
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.address
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.peer_addr().ok())
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<SocketAddr>> {
        &self.dispatcher
    }
}

impl Drop for ClientTransport {
    fn drop(&mut self) {
        self.drop_stream();
    }
}

fn open_stream(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, TransportError> {
    let stream =
        TcpStream::connect_timeout(&addr, timeout).map_err(TransportError::ConnectFailed)?;
    stream.set_nonblocking(true).map_err(TransportError::ConnectFailed)?;
    stream.set_nodelay(true).map_err(TransportError::ConnectFailed)?;
    Ok(stream)
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
    let delay = base.saturating_mul(factor).min(max);
    let jitter_cap = delay.as_millis() as u64 / 4;
    let jitter = if jitter_cap == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_cap)
    };
    delay + Duration::from_millis(jitter)
}
