//! Envelope codec
//!
//! Layers envelope (de)serialization on top of [`FrameCodec`]: each frame
//! payload is exactly one encoded [`MultiplexerMessage`].

use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{FrameCodec, HEADER_SIZE};
use bytes::{Bytes, BytesMut};
use prost::Message;
use tokio_util::codec::{Decoder, Encoder};
use types::MultiplexerMessage;

/// Frames carrying one envelope each
#[derive(Debug, Clone, Default)]
pub struct MessageCodec {
    frames: FrameCodec,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            frames: FrameCodec::with_max_frame_size(max_frame_size),
        }
    }
}

/// Bytes a message occupies on the wire, header included
pub fn wire_size(message: &MultiplexerMessage) -> usize {
    HEADER_SIZE + message.encoded_len()
}

/// Serialize an envelope into a frame payload
pub fn encode_message(message: &MultiplexerMessage) -> Bytes {
    Bytes::from(message.encode_to_vec())
}

/// Parse a frame payload into an envelope
pub fn decode_message(payload: &[u8]) -> ProtocolResult<MultiplexerMessage> {
    MultiplexerMessage::decode(payload)
        .map_err(|e| ProtocolError::malformed_envelope(payload.len(), e))
}

impl Decoder for MessageCodec {
    type Item = MultiplexerMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> ProtocolResult<Option<MultiplexerMessage>> {
        match self.frames.decode(src)? {
            Some(payload) => decode_message(&payload).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<MultiplexerMessage> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: MultiplexerMessage, dst: &mut BytesMut) -> ProtocolResult<()> {
        self.frames.encode(encode_message(&message), dst)
    }
}
