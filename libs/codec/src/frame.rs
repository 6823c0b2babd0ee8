//! # Frame Codec
//!
//! Turns a byte stream into length-prefixed, CRC32-checked frames and back.
//! The codec knows nothing about envelopes; the payload is opaque bytes.
//!
//! ## Wire Format
//!
//! ```text
//! ┌──────────────────┬──────────────────┬─────────────────────┐
//! │ LENGTH (i32 LE)  │ CRC32 (i32 LE)   │ PAYLOAD (LENGTH B)  │
//! └──────────────────┴──────────────────┴─────────────────────┘
//! ```
//!
//! Decoding is incremental: a partial frame leaves the buffer untouched and
//! returns `Ok(None)` until the remaining bytes arrive. A negative length, an
//! oversized length or a checksum mismatch is an error, after which the
//! stream cannot be trusted and the connection must be closed.

use crate::error::{ProtocolError, ProtocolResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use types::MAX_MESSAGE_SIZE;

/// Length field plus checksum field
pub const HEADER_SIZE: usize = 8;

/// Calculate CRC32 checksum for a frame payload
pub fn calculate_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Length-prefixed, checksummed frame codec
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_MESSAGE_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> ProtocolResult<Option<Bytes>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut header = &src[..HEADER_SIZE];
        let length = header.get_i32_le();
        let expected = header.get_u32_le();

        if length < 0 {
            return Err(ProtocolError::negative_length(length));
        }
        let length = length as usize;
        if length > self.max_frame_size {
            return Err(ProtocolError::frame_too_large(length, self.max_frame_size));
        }

        let total = HEADER_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length).freeze();

        let calculated = calculate_crc32(&payload);
        if calculated != expected {
            return Err(ProtocolError::checksum_mismatch(expected, calculated, length));
        }

        Ok(Some(payload))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> ProtocolResult<()> {
        encode_into(&payload, self.max_frame_size, dst)
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, payload: &[u8], dst: &mut BytesMut) -> ProtocolResult<()> {
        encode_into(payload, self.max_frame_size, dst)
    }
}

fn encode_into(payload: &[u8], max_frame_size: usize, dst: &mut BytesMut) -> ProtocolResult<()> {
    if payload.len() > max_frame_size {
        return Err(ProtocolError::frame_too_large(payload.len(), max_frame_size));
    }

    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_i32_le(payload.len() as i32);
    dst.put_u32_le(calculate_crc32(payload));
    dst.put_slice(payload);
    Ok(())
}

/// Encode a single frame into a fresh buffer
pub fn encode_frame(payload: &[u8]) -> ProtocolResult<Bytes> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    encode_into(payload, MAX_MESSAGE_SIZE, &mut buf)?;
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let frame = encode_frame(b"abc").unwrap();
        assert_eq!(frame.len(), HEADER_SIZE + 3);
        assert_eq!(&frame[0..4], &3i32.to_le_bytes());
        assert_eq!(&frame[4..8], &calculate_crc32(b"abc").to_le_bytes());
        assert_eq!(&frame[8..], b"abc");
    }

    #[test]
    fn test_partial_reads_resume() {
        let frame = encode_frame(b"hello world").unwrap();
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        for chunk in frame.chunks(3) {
            assert!(buf.len() < frame.len());
            let before = codec.decode(&mut buf).unwrap();
            assert!(before.is_none());
            buf.extend_from_slice(chunk);
        }

        let payload = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&payload[..], b"hello world");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(b"one").unwrap());
        buf.extend_from_slice(&encode_frame(b"").unwrap());
        buf.extend_from_slice(&encode_frame(b"three").unwrap());

        let mut codec = FrameCodec::new();
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"one");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"three");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(-5);
        buf.put_u32_le(0);
        let err = FrameCodec::new().decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::NegativeLength { length: -5, .. }));
    }

    #[test]
    fn test_oversized_length_rejected_before_payload_arrives() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(1025);
        buf.put_u32_le(0);
        let err = FrameCodec::with_max_frame_size(1024)
            .decode(&mut buf)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { size: 1025, max: 1024 }));
    }

    #[test]
    fn test_oversized_payload_not_encoded() {
        let mut codec = FrameCodec::with_max_frame_size(4);
        let mut dst = BytesMut::new();
        let err = codec.encode(&b"too long"[..], &mut dst).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
        assert!(dst.is_empty());
    }
}
