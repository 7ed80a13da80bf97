use gamelink_protocol::ProtocolError;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// `connect()` was called before `init()` gave the client an address.
    #[error("transport has no server address; call init() first")]
    NotInitialized,

    /// `init()` was called while a socket is still open.
    #[error("transport already has an active connection")]
    AlreadyActive,

    /// The configured address did not resolve to a socket address.
    #[error("cannot resolve address {addr}: {source}")]
    AddressResolution {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Opening the TCP connection failed or timed out.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
