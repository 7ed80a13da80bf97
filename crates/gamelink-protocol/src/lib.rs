//! Wire protocol for gamelink.
//!
//! This crate defines what travels between client and server:
//!
//! - **Types** ([`Envelope`], [`Request`], [`Response`], and the payloads)
//!   with the [`Message`] trait that gives each payload a routing name.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how a message body is
//!   converted to/from bytes.
//! - **Framing** ([`FrameEncoder`], [`FrameDecoder`]): how bodies are
//!   delimited inside a TCP byte stream.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Framing (frames) → Codec (Envelope) → Dispatch (handlers)
//! ```
//!
//! Nothing here touches a socket; the transport crate owns I/O.

mod codec;
mod error;
mod framing;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use framing::{
    DEFAULT_MAX_FRAME_SIZE, FrameDecoder, FrameEncoder, HEADER_LEN,
};
pub use types::{
    CharacterClass, CharacterInfo, Envelope, FirstTestRequest, Message,
    PlayerInfo, Request, Response, ResultCode, UserCreateCharacterRequest,
    UserCreateCharacterResponse, UserInfo, UserLoginRequest,
    UserLoginResponse, UserRegisterRequest, UserRegisterResponse,
};
