//! TCP accept loop for the server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::TransportError;

/// Pause after a failed accept so a persistent error (out of file
/// descriptors) does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Listens on one address and hands every accepted socket to a callback.
///
/// One accept is outstanding at a time. The callback runs on the accept
/// task, so it should spawn per-connection work rather than do it inline.
///
/// Dropping the listener stops it.
pub struct ServerListener {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ServerListener {
    /// Binds `addr`, listens with the given backlog, and starts accepting.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn start<F>(
        addr: &str,
        backlog: u32,
        on_connection: F,
    ) -> Result<Self, TransportError>
    where
        F: Fn(TcpStream, SocketAddr) + Send + Sync + 'static,
    {
        let bind_addr = tokio::net::lookup_host(addr)
            .await
            .map_err(|source| TransportError::AddressResolution {
                addr: addr.to_string(),
                source,
            })?
            .next()
            .ok_or_else(|| TransportError::AddressResolution {
                addr: addr.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no addresses found",
                ),
            })?;

        let listener = bind(bind_addr, backlog).map_err(TransportError::AcceptFailed)?;
        let local_addr = listener.local_addr().map_err(TransportError::AcceptFailed)?;
        tracing::info!(%local_addr, backlog, "server listening");

        let (shutdown, shutdown_rx) = watch::channel(false);
        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            on_connection,
            Arc::clone(&running),
        ));

        Ok(Self {
            local_addr,
            shutdown,
            running,
            task: Mutex::new(Some(task)),
        })
    }

    /// The bound address. Useful after binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Aborts the pending accept and closes the listening socket.
    /// Safe to call repeatedly.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Waits for the accept loop to exit. Returns immediately if it
    /// already has, or if another caller is already joining.
    pub async fn join(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "accept loop ended abnormally");
            }
        }
    }
}

fn bind(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

async fn accept_loop<F>(
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    on_connection: F,
    running: Arc<AtomicBool>,
) where
    F: Fn(TcpStream, SocketAddr) + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            biased;
            // Err means the ServerListener was dropped.
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "accepted connection");
                    on_connection(stream, peer);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }

    running.store(false, Ordering::Release);
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(local_addr = %addr, "server listener stopped");
    }
}
