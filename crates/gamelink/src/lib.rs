//! # gamelink
//!
//! Networking core for a game client and its server.
//!
//! Messages travel as length-prefixed frames over TCP. On both sides,
//! received messages are published to a [`Dispatcher`] and domain code
//! subscribes by payload type:
//!
//! - The **server** ([`NetService`]) accepts connections on Tokio and runs
//!   handlers on a fixed pool of dispatcher worker threads. The sender of
//!   each message is its [`Connection`], which handlers use to reply.
//! - The **client** ([`ClientTransport`]) does all of its I/O inside a
//!   per-frame `tick()` and runs handlers on the calling thread.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gamelink::prelude::*;
//!
//! # async fn run() -> Result<(), GamelinkError> {
//! gamelink::init_tracing();
//!
//! let dispatcher: Arc<ServerDispatcher<()>> = Arc::new(Dispatcher::new());
//! dispatcher.subscribe::<UserLoginRequest, _>(|conn, req| {
//!     let reply = UserLoginResponse {
//!         result: ResultCode::Success,
//!         errormsg: format!("welcome {}", req.user),
//!         userinfo: None,
//!     };
//!     conn.send_envelope(&reply.into())?;
//!     Ok(())
//! });
//!
//! let mut server = NetService::builder().bind("0.0.0.0:8000").build(dispatcher);
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod handler;
mod logging;
mod server;

pub use config::ServerConfig;
pub use error::GamelinkError;
pub use logging::init_tracing;
pub use server::{NetService, NetServiceBuilder, ServerDispatcher};

pub use gamelink_dispatch::{
    DispatchError, DispatchStats, Dispatcher, HandlerError, SubscriptionId,
};
pub use gamelink_protocol::{Envelope, Message, ProtocolError};
pub use gamelink_transport::{
    ClientConfig, ClientEvent, ClientTransport, CloseReason, ConnectResult,
    Connection, ConnectionId, ConnectionState, TransportError,
};

/// Re-exports for the common case: `use gamelink::prelude::*;`.
pub mod prelude {
    pub use crate::{GamelinkError, NetService, ServerConfig, ServerDispatcher};
    pub use gamelink_dispatch::{Dispatcher, HandlerError, SubscriptionId};
    pub use gamelink_protocol::{
        CharacterClass, CharacterInfo, Envelope, FirstTestRequest, Message,
        PlayerInfo, Request, Response, ResultCode, UserCreateCharacterRequest,
        UserCreateCharacterResponse, UserInfo, UserLoginRequest,
        UserLoginResponse, UserRegisterRequest, UserRegisterResponse,
    };
    pub use gamelink_transport::{
        ClientConfig, ClientEvent, ClientTransport, CloseReason, ConnectResult,
        Connection, ConnectionState,
    };
}
