//! Unified error type for gamelink.

use gamelink_dispatch::DispatchError;
use gamelink_protocol::ProtocolError;
use gamelink_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum GamelinkError {
    /// A transport-level error (bind, connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, illegal frame).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A dispatch-level error (worker pool, strict-mode handler failure).
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A blocking lifecycle step on Tokio's blocking pool panicked or
    /// was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
