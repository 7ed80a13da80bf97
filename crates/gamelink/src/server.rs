//! `NetService` builder and lifecycle.
//!
//! This is the entry point for running a gamelink server. It ties the
//! layers together: listener → per-connection task → framing →
//! dispatcher workers → handlers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gamelink_dispatch::Dispatcher;
use gamelink_transport::{Connection, ConnectionId, ServerListener, TransportError};
use tokio::sync::watch;

use crate::config::ServerConfig;
use crate::handler::handle_connection;
use crate::GamelinkError;

/// The dispatcher type a server's handlers subscribe to: the sender of
/// every message is the connection it arrived on.
pub type ServerDispatcher<S> = Dispatcher<Arc<Connection<S>>>;

/// Shared server state passed to each connection task.
pub(crate) struct ServerState<S: Send + 'static> {
    pub(crate) config: ServerConfig,
    pub(crate) dispatcher: Arc<ServerDispatcher<S>>,
    pub(crate) connections: Mutex<HashMap<ConnectionId, Arc<Connection<S>>>>,
    /// `true` from the start of [`NetService::stop`] until the next start.
    /// Connection tasks watch it so none outlives a stop.
    pub(crate) shutdown: watch::Sender<bool>,
}

impl<S: Send + 'static> ServerState<S> {
    pub(crate) fn new(config: ServerConfig, dispatcher: Arc<ServerDispatcher<S>>) -> Self {
        Self {
            config,
            dispatcher,
            connections: Mutex::new(HashMap::new()),
            shutdown: watch::channel(false).0,
        }
    }

    pub(crate) fn connections(
        &self,
    ) -> MutexGuard<'_, HashMap<ConnectionId, Arc<Connection<S>>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builder for configuring a [`NetService`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use gamelink::prelude::*;
///
/// # async fn run() -> Result<(), GamelinkError> {
/// let dispatcher: Arc<ServerDispatcher<()>> = Arc::new(Dispatcher::new());
/// dispatcher.subscribe::<FirstTestRequest, _>(|conn, req| {
///     tracing::info!(conn_id = %conn.id(), text = %req.helloworld, "hello");
///     Ok(())
/// });
///
/// let mut service = NetService::builder()
///     .bind("0.0.0.0:8000")
///     .workers(8)
///     .build(dispatcher);
/// service.start().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct NetServiceBuilder {
    config: ServerConfig,
}

impl NetServiceBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every setting at once.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn backlog(mut self, backlog: u32) -> Self {
        self.config.backlog = backlog;
        self
    }

    /// Number of dispatcher worker threads.
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size;
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Builds the service around a dispatcher the caller has already
    /// subscribed its handlers to. Nothing is bound until
    /// [`NetService::start`].
    pub fn build<S>(self, dispatcher: Arc<ServerDispatcher<S>>) -> NetService<S>
    where
        S: Default + Send + 'static,
    {
        NetService {
            state: Arc::new(ServerState::new(self.config.validated(), dispatcher)),
            listener: None,
        }
    }
}

/// A gamelink server: one listener, one task per connection, and a
/// dispatcher worker pool.
///
/// `S` is the per-connection session, created with `S::default()` on
/// accept and reachable from handlers through
/// [`Connection::session`].
pub struct NetService<S: Send + 'static> {
    state: Arc<ServerState<S>>,
    listener: Option<ServerListener>,
}

impl NetService<()> {
    /// Creates a new builder. The session type is picked by
    /// [`NetServiceBuilder::build`] from the dispatcher it is given.
    pub fn builder() -> NetServiceBuilder {
        NetServiceBuilder::new()
    }
}

impl<S: Default + Send + 'static> NetService<S> {
    /// Starts the dispatcher workers, then binds and starts accepting.
    ///
    /// Starting the worker pool blocks until every worker is up, so it
    /// runs on Tokio's blocking pool.
    ///
    /// Returns the bound address.
    ///
    /// # Errors
    /// - `Transport(AlreadyActive)` if the service is running.
    /// - `Dispatch` if the worker pool cannot start.
    /// - `Transport` if the address cannot be bound; the worker pool is
    ///   stopped again.
    pub async fn start(&mut self) -> Result<SocketAddr, GamelinkError> {
        if self.listener.is_some() {
            return Err(TransportError::AlreadyActive.into());
        }
        let dispatcher = Arc::clone(&self.state.dispatcher);
        let wanted = self.state.config.workers;
        let workers = tokio::task::spawn_blocking(move || dispatcher.start(wanted)).await??;
        self.state.shutdown.send_replace(false);

        let config = &self.state.config;

        let state = Arc::clone(&self.state);
        let started = ServerListener::start(&config.bind_addr, config.backlog, move |stream, peer| {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, state).await {
                    tracing::debug!(%peer, error = %e, "connection ended with error");
                }
            });
        })
        .await;

        let listener = match started {
            Ok(listener) => listener,
            Err(e) => {
                self.stop_dispatcher().await;
                return Err(e.into());
            }
        };
        let addr = listener.local_addr();
        self.listener = Some(listener);
        tracing::info!(%addr, workers, "gamelink server running");
        Ok(addr)
    }

    /// Stops accepting, closes every open connection, then stops the
    /// dispatcher. Safe to call repeatedly.
    ///
    /// A connection accepted just before the listener stopped may not be
    /// registered yet; its task sees the shutdown flag and closes itself.
    pub async fn stop(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        self.state.shutdown.send_replace(true);
        listener.stop();
        listener.join().await;

        let open: Vec<_> = self.state.connections().drain().map(|(_, c)| c).collect();
        for conn in &open {
            conn.close();
        }
        self.stop_dispatcher().await;
        tracing::info!(closed = open.len(), "gamelink server stopped");
    }

    /// Joins the worker threads off the async executor.
    async fn stop_dispatcher(&self) {
        let dispatcher = Arc::clone(&self.state.dispatcher);
        if let Err(e) = tokio::task::spawn_blocking(move || dispatcher.stop()).await {
            tracing::error!(error = %e, "dispatcher stop task failed");
        }
    }

    pub fn is_running(&self) -> bool {
        self.listener.as_ref().is_some_and(ServerListener::is_running)
    }

    /// The bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(ServerListener::local_addr)
    }

    /// Open connections.
    pub fn connection_count(&self) -> usize {
        self.state.connections().len()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection<S>>> {
        self.state.connections().get(&id).cloned()
    }

    pub fn dispatcher(&self) -> &Arc<ServerDispatcher<S>> {
        &self.state.dispatcher
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}
