//! Protocol-level errors for frame and envelope processing
//!
//! On the read side every variant signals a corrupted or hostile stream and the
//! connection that produced it must be closed. On the write side
//! `FrameTooLarge` rejects one message and leaves the stream intact.

use thiserror::Error;

/// Frame and envelope decoding errors with diagnostic context
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Length header decoded to a negative value
    #[error("Negative frame length {length} (likely cause: {likely_cause})")]
    NegativeLength { length: i32, likely_cause: String },

    /// Frame exceeds the protocol limit
    #[error("Frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Frame checksum validation failed - indicates data corruption
    #[error("Checksum mismatch: expected {expected:#010x}, calculated {calculated:#010x} (frame: {frame_size} bytes, cause: {likely_cause})")]
    ChecksumMismatch {
        expected: u32,
        calculated: u32,
        frame_size: usize,
        likely_cause: String,
    },

    /// Payload passed the checksum but is not a valid envelope
    #[error("Malformed envelope ({frame_size} bytes): {source}")]
    MalformedEnvelope {
        frame_size: usize,
        #[source]
        source: prost::DecodeError,
    },

    /// Underlying socket failure while reading or writing frames
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for codec operations
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

impl ProtocolError {
    pub fn negative_length(length: i32) -> Self {
        let likely_cause = if length == -1 {
            "peer speaking a different protocol"
        } else {
            "stream desynchronized or corrupted"
        };

        Self::NegativeLength {
            length,
            likely_cause: likely_cause.to_string(),
        }
    }

    pub fn frame_too_large(size: usize, max: usize) -> Self {
        Self::FrameTooLarge { size, max }
    }

    /// Create ChecksumMismatch error with diagnostic context
    pub fn checksum_mismatch(expected: u32, calculated: u32, frame_size: usize) -> Self {
        let likely_cause = if expected == 0 {
            "frame written without checksum calculation"
        } else if expected.swap_bytes() == calculated {
            "byte order (endianness) mismatch"
        } else {
            "data corruption during transmission"
        };

        Self::ChecksumMismatch {
            expected,
            calculated,
            frame_size,
            likely_cause: likely_cause.to_string(),
        }
    }

    pub fn malformed_envelope(frame_size: usize, source: prost::DecodeError) -> Self {
        Self::MalformedEnvelope { frame_size, source }
    }

    /// True when the stream itself is corrupt rather than the socket failing
    pub fn is_corruption(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}
