//! Codec trait and implementations for serializing/deserializing messages.
//!
//! A codec turns a Rust value into the body of a frame and back. The
//! framing layer ([`crate::FrameEncoder`], [`crate::FrameDecoder`]) doesn't
//! care HOW bodies are serialized; it only needs something that implements
//! [`Codec`]. Swapping JSON for a compact binary format touches nothing
//! else in the workspace.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec instance is shared by the
/// listener task, every connection task, and the dispatcher workers.
/// `Clone` lets each connection own its decoder without sharing state.
pub trait Codec: Clone + Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Human-readable bodies make captured traffic easy to inspect. This is
/// behind the `json` feature flag (enabled by default).
///
/// ## Example
///
/// ```rust
/// use gamelink_protocol::{Codec, Envelope, JsonCodec, UserLoginRequest};
///
/// let codec = JsonCodec;
/// let envelope = Envelope::from(UserLoginRequest {
///     user: "alice".into(),
///     password: "pw".into(),
/// });
///
/// let bytes = codec.encode(&envelope).unwrap();
/// let decoded: Envelope = codec.decode(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{Envelope, FirstTestRequest};

    #[test]
    fn test_json_codec_round_trip_envelope() {
        let codec = JsonCodec;
        let envelope = Envelope::from(FirstTestRequest {
            helloworld: "hi".into(),
        });
        let bytes = codec.encode(&envelope).unwrap();
        let decoded: Envelope = codec.decode(&bytes).unwrap();
        assert_eq!(envelope, decoded);
    }

    #[test]
    fn test_json_codec_decode_garbage_returns_decode_error() {
        let result: Result<Envelope, _> = JsonCodec.decode(b"\x00\x01garbage");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
