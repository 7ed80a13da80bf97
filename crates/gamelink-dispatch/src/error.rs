//! Error types for the dispatch layer.

/// What a subscriber returns when it cannot handle a message.
///
/// Boxed so domain code can use its own error types (database errors,
/// validation errors) without the dispatcher knowing about them.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A subscriber returned an error. Only surfaced in strict mode.
    #[error("handler for {message_type} failed: {source}")]
    HandlerFailed {
        message_type: &'static str,
        #[source]
        source: HandlerError,
    },

    /// A subscriber panicked. Only surfaced in strict mode.
    #[error("handler for {message_type} panicked: {message}")]
    HandlerPanicked {
        message_type: &'static str,
        message: String,
    },

    /// `start()` was called on a dispatcher whose workers are running.
    #[error("dispatcher is already running")]
    AlreadyRunning,

    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn dispatch worker: {0}")]
    SpawnFailed(#[source] std::io::Error),
}
