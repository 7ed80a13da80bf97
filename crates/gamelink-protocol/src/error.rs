//! Error types for the protocol layer.
//!
//! Each crate in gamelink defines its own error enum. A `ProtocolError`
//! always means the bytes themselves were wrong: a body that would not
//! serialize, a frame that would not deserialize, or a length header that
//! no well-behaved peer would ever send.

/// Errors that can occur while encoding, decoding, or framing messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, an unknown payload tag, or an
    /// envelope carrying both (or neither) of request and response.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A length header declared a negative payload length.
    ///
    /// No encoder produces this, so the stream is out of sync or the peer
    /// speaks another protocol. Fatal for the connection.
    #[error("invalid frame length: {0}")]
    InvalidFrameLength(i64),

    /// A frame (or a body about to be framed) exceeds the configured maximum.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}

impl ProtocolError {
    /// Returns `true` if the stream can no longer be trusted.
    ///
    /// A bad length header desynchronizes framing for good, while a body
    /// that fails to deserialize was still cleanly delimited and can be
    /// skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidFrameLength(_) | Self::FrameTooLarge { .. }
        )
    }
}
