//! Message dispatch for gamelink.
//!
//! Decouples the network layer from game logic. The transport publishes
//! each decoded [`Envelope`](gamelink_protocol::Envelope) together with
//! the sender it came from. Domain services subscribe by payload type and
//! never see sockets.
//!
//! ```text
//! Connection ──publish──▶ queue ──distribute / workers──▶ handlers[T::NAME]
//! ```

mod dispatcher;
mod error;

pub use dispatcher::{
    DispatchStats, Dispatcher, MAX_WORKERS, MIN_WORKERS, SubscriptionId,
};
pub use error::{DispatchError, HandlerError};
