//! Server configuration.

use gamelink_dispatch::{MAX_WORKERS, MIN_WORKERS};
use gamelink_protocol::DEFAULT_MAX_FRAME_SIZE;
use gamelink_transport::DEFAULT_RECV_BUFFER_SIZE;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Everything [`NetService`](crate::NetService) needs to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on. Port 0 picks a free port.
    pub bind_addr: String,

    /// Pending-connection queue length passed to `listen()`.
    pub backlog: u32,

    /// Dispatcher worker threads.
    pub workers: usize,

    /// Bytes read from a socket per read call.
    pub recv_buffer_size: usize,

    /// Largest frame body accepted or produced.
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            backlog: 10,
            workers: 8,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// - `workers` clamped to the dispatcher's supported range.
    /// - `backlog`, `recv_buffer_size` and `max_frame_size` must be non-zero.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();

        let workers = self.workers.clamp(MIN_WORKERS, MAX_WORKERS);
        if workers != self.workers {
            warn!(workers = self.workers, clamped = workers, "workers out of range, clamping");
            self.workers = workers;
        }
        if self.backlog == 0 {
            warn!(default = defaults.backlog, "backlog is 0, using default");
            self.backlog = defaults.backlog;
        }
        if self.recv_buffer_size == 0 {
            warn!("recv_buffer_size is 0, using default");
            self.recv_buffer_size = defaults.recv_buffer_size;
        }
        if self.max_frame_size == 0 {
            warn!("max_frame_size is 0, using default");
            self.max_frame_size = defaults.max_frame_size;
        }
        self
    }
}
