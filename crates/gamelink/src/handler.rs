//! Per-connection task: socket reads in, outbound frames out.
//!
//! Each accepted socket gets its own Tokio task running
//! [`handle_connection`]. The flow is:
//!   1. Wrap the socket in a `Connection` with a fresh session
//!   2. Spawn a writer that drains the connection's outbound queue
//!   3. Loop: read → feed the framing buffer → publish each envelope
//!   4. On EOF, I/O error, framing violation, `close()`, or server
//!      shutdown: tear down

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use gamelink_transport::{Connection, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};

use crate::server::ServerState;
use crate::GamelinkError;

/// Removes the connection from the server's table when the task exits,
/// even if it exits by panic.
struct ConnectionGuard<S: Send + 'static> {
    conn: Arc<Connection<S>>,
    state: Arc<ServerState<S>>,
}

impl<S: Send + 'static> Drop for ConnectionGuard<S> {
    fn drop(&mut self) {
        self.conn.close();
        self.state.connections().remove(&self.conn.id());
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<S>(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState<S>>,
) -> Result<(), GamelinkError>
where
    S: Default + Send + 'static,
{
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%peer, error = %e, "set_nodelay failed");
    }

    let (conn, outbound) = Connection::new(peer, S::default(), state.config.max_frame_size);
    let conn_id = conn.id();
    let shutdown = state.shutdown.subscribe();
    state.connections().insert(conn_id, Arc::clone(&conn));
    let _guard = ConnectionGuard {
        conn: Arc::clone(&conn),
        state: Arc::clone(&state),
    };
    // Checked after registering: a stop that drained the table before the
    // insert has already raised the flag.
    if *shutdown.borrow() {
        tracing::debug!(%conn_id, %peer, "accepted during shutdown, closing");
        return Ok(());
    }
    tracing::info!(%conn_id, %peer, "connection opened");

    let (reader, writer) = stream.into_split();
    let writer_task = tokio::spawn(write_loop(writer, outbound, Arc::clone(&conn)));

    let result = read_loop(reader, &conn, &state, shutdown).await;
    conn.close();
    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(%conn_id, error = %e, "writer stopped"),
        Err(e) => tracing::warn!(%conn_id, error = %e, "writer task ended abnormally"),
    }

    tracing::info!(%conn_id, %peer, "connection closed");
    result
}

async fn read_loop<S>(
    mut reader: OwnedReadHalf,
    conn: &Arc<Connection<S>>,
    state: &ServerState<S>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), GamelinkError>
where
    S: Send + 'static,
{
    let conn_id = conn.id();
    let mut buf = vec![0u8; state.config.recv_buffer_size];
    let mut decoded = Vec::new();

    loop {
        let n = tokio::select! {
            _ = conn.closed() => {
                tracing::debug!(%conn_id, "closed locally");
                return Ok(());
            }
            _ = shutdown.wait_for(|stopping| *stopping) => {
                tracing::debug!(%conn_id, "server shutting down");
                return Ok(());
            }
            read = reader.read(&mut buf) => read.map_err(TransportError::ReceiveFailed)?,
        };
        if n == 0 {
            tracing::debug!(%conn_id, "peer closed connection");
            return Ok(());
        }

        let fed = conn.receive(&buf[..n], &mut decoded);
        for envelope in decoded.drain(..) {
            state.dispatcher.publish(Arc::clone(conn), envelope);
        }

        match fed {
            Ok(_) => {}
            Err(e) if e.is_fatal() => {
                tracing::warn!(%conn_id, error = %e, "framing violation, closing connection");
                return Err(e.into());
            }
            Err(e) => {
                tracing::warn!(%conn_id, error = %e, "dropping undecodable frame");
            }
        }
    }
}

async fn write_loop<S>(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    conn: Arc<Connection<S>>,
) -> Result<(), TransportError>
where
    S: Send + 'static,
{
    loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = writer.write_all(&frame).await {
                        conn.close();
                        return Err(TransportError::SendFailed(e));
                    }
                }
                None => break,
            },
            _ = conn.closed() => break,
        }
    }

    // Flush replies queued before the close, e.g. a kick notice.
    while let Ok(frame) = outbound.try_recv() {
        writer.write_all(&frame).await.map_err(TransportError::SendFailed)?;
    }
    // The peer may already be gone.
    let _ = writer.shutdown().await;
    Ok(())
}

// =========================================================================
// Tests
// =========================================================================
