//! Client transport configuration.

use std::time::Duration;

use gamelink_protocol::DEFAULT_MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default receive buffer size (64 KiB).
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Tunables for [`ClientTransport`](crate::ClientTransport).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Consecutive failed connect attempts before giving up and raising a
    /// failed Connected event.
    pub retry_limit: u32,

    /// Upper bound on a single blocking connect attempt.
    pub connect_timeout: Duration,

    /// Bytes read from the socket per tick.
    pub recv_buffer_size: usize,

    /// Largest frame body accepted or produced.
    pub max_frame_size: usize,

    /// First reconnect delay after a reconnect-eligible close. Doubles on
    /// each further attempt.
    pub reconnect_backoff_base: Duration,

    /// Cap on the reconnect delay, before jitter.
    pub reconnect_backoff_max: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            connect_timeout: Duration::from_secs(10),
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            reconnect_backoff_base: Duration::from_millis(500),
            reconnect_backoff_max: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Smallest accepted receive buffer.
    pub const MIN_RECV_BUFFER_SIZE: usize = 1024;

    /// Clamp any out-of-range values so the config is safe to use.
    ///
    /// Called by [`ClientTransport::new`](crate::ClientTransport::new).
    /// - `retry_limit` at least 1.
    /// - `connect_timeout` non-zero (falls back to the default).
    /// - `recv_buffer_size` at least [`Self::MIN_RECV_BUFFER_SIZE`].
    /// - `max_frame_size` non-zero.
    /// - `reconnect_backoff_max` no smaller than the base.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();

        if self.retry_limit == 0 {
            warn!("retry_limit is 0, using 1");
            self.retry_limit = 1;
        }
        if self.connect_timeout.is_zero() {
            warn!(
                default = ?defaults.connect_timeout,
                "connect_timeout is zero, using default"
            );
            self.connect_timeout = defaults.connect_timeout;
        }
        if self.recv_buffer_size < Self::MIN_RECV_BUFFER_SIZE {
            warn!(
                size = self.recv_buffer_size,
                min = Self::MIN_RECV_BUFFER_SIZE,
                "recv_buffer_size too small, clamping"
            );
            self.recv_buffer_size = Self::MIN_RECV_BUFFER_SIZE;
        }
        if self.max_frame_size == 0 {
            warn!("max_frame_size is 0, using default");
            self.max_frame_size = defaults.max_frame_size;
        }
        if self.reconnect_backoff_max < self.reconnect_backoff_base {
            warn!(
                base = ?self.reconnect_backoff_base,
                max = ?self.reconnect_backoff_max,
                "reconnect_backoff_max below base, raising it"
            );
            self.reconnect_backoff_max = self.reconnect_backoff_base;
        }
        self
    }
}
