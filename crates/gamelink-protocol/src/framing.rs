//! Length-prefixed framing over a byte stream.
//!
//! TCP delivers bytes, not messages: one `read` may return half a frame,
//! or three and a half. Every frame is therefore prefixed with its body
//! length so the receiver knows where it ends:
//!
//! ```text
//! ┌──────────────────┬───────────────────────────────┐
//! │ length: i32 (LE) │ body: `length` bytes (codec)   │
//! └──────────────────┴───────────────────────────────┘
//! ```
//!
//! [`FrameEncoder`] produces frames. [`FrameDecoder`] accumulates whatever
//! bytes arrive and yields an [`Envelope`] only once its whole body is
//! buffered.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Codec, Envelope, ProtocolError};

/// Size of the length header in bytes.
pub const HEADER_LEN: usize = 4;

/// Default upper bound on a single frame body (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// FrameEncoder
// ---------------------------------------------------------------------------

/// Serializes envelopes into length-prefixed frames.
#[derive(Debug, Clone)]
pub struct FrameEncoder<C: Codec> {
    codec: C,
    max_frame_size: usize,
}

impl<C: Codec> FrameEncoder<C> {
    pub fn new(codec: C, max_frame_size: usize) -> Self {
        Self {
            codec,
            max_frame_size,
        }
    }

    /// Encodes one envelope as `header + body`.
    ///
    /// # Errors
    /// - `ProtocolError::Encode` if the codec fails.
    /// - `ProtocolError::FrameTooLarge` if the body exceeds the maximum
    ///   frame size; a peer would reject it anyway.
    pub fn encode(&self, envelope: &Envelope) -> Result<Bytes, ProtocolError> {
        let body = self.codec.encode(envelope)?;
        let too_large = || ProtocolError::FrameTooLarge {
            size: body.len(),
            max: self.max_frame_size,
        };
        if body.len() > self.max_frame_size {
            return Err(too_large());
        }
        let declared = i32::try_from(body.len()).map_err(|_| too_large())?;

        let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
        frame.put_i32_le(declared);
        frame.put_slice(&body);
        Ok(frame.freeze())
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

// ---------------------------------------------------------------------------
// FrameDecoder
// ---------------------------------------------------------------------------

/// Incrementally reassembles envelopes from a byte stream.
///
/// One decoder per connection. It owns the accumulation buffer, so partial
/// frames survive between calls to [`feed`](Self::feed).
#[derive(Debug)]
pub struct FrameDecoder<C: Codec> {
    codec: C,
    buffer: BytesMut,
    max_frame_size: usize,
}

impl<C: Codec> FrameDecoder<C> {
    pub fn new(codec: C, max_frame_size: usize) -> Self {
        Self {
            codec,
            buffer: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Appends `data` and pushes every envelope it completes onto `out`.
    ///
    /// Returns how many envelopes were pushed. Envelopes are pushed in
    /// the order their frames completed, and consumed bytes are removed
    /// from the front of the buffer.
    ///
    /// # Errors
    /// - `InvalidFrameLength` / `FrameTooLarge` when a header is illegal.
    ///   The buffer is discarded and nothing from the offending frame is
    ///   emitted; the stream is unusable and the connection must close.
    /// - `Decode` when a correctly delimited body fails to deserialize.
    ///   That frame is skipped and decoding continues with the frames
    ///   after it; the first such error is returned once the buffer holds
    ///   no further complete frame.
    ///
    /// In both cases every envelope completed in the same call is already
    /// in `out`.
    pub fn feed(
        &mut self,
        data: &[u8],
        out: &mut Vec<Envelope>,
    ) -> Result<usize, ProtocolError> {
        self.buffer.extend_from_slice(data);
        let mut decoded = 0;
        let mut skipped: Option<ProtocolError> = None;

        while self.buffer.len() >= HEADER_LEN {
            let mut header = &self.buffer[..HEADER_LEN];
            let declared = header.get_i32_le();

            if declared < 0 {
                self.buffer.clear();
                return Err(ProtocolError::InvalidFrameLength(declared.into()));
            }
            let len = declared as usize;
            if len > self.max_frame_size {
                self.buffer.clear();
                return Err(ProtocolError::FrameTooLarge {
                    size: len,
                    max: self.max_frame_size,
                });
            }
            if self.buffer.len() < HEADER_LEN + len {
                break;
            }

            self.buffer.advance(HEADER_LEN);
            let body = self.buffer.split_to(len);
            let envelope: Envelope = match self.codec.decode(&body) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::debug!(len, error = %e, "undecodable frame skipped");
                    skipped.get_or_insert(e);
                    continue;
                }
            };
            tracing::trace!(
                len,
                message_type = envelope.message_type(),
                "frame decoded"
            );
            out.push(envelope);
            decoded += 1;
        }

        match skipped {
            Some(e) => Err(e),
            None => Ok(decoded),
        }
    }

    /// Drops any partially received frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Bytes buffered while waiting for the rest of a frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
