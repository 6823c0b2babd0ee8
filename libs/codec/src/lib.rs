//! # Multiplexer Protocol Codec
//!
//! ## Purpose
//!
//! The "rules" layer between raw sockets and the envelope data model:
//! - [`FrameCodec`]: length-prefixed, CRC32-checked frames (envelope-agnostic)
//! - [`MessageCodec`]: one encoded envelope per frame
//! - [`ProtocolError`]: every way a stream can be corrupt
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → [codec] → network/
//!     ↑           ↓          ↓
//! Envelope    Framing    Connections
//! structs     CRC32      Sockets
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Socket management or connection handling (belongs in network/)
//! - Routing decisions (belongs in messaging/)

pub mod envelope;
pub mod error;
pub mod frame;

pub use envelope::{decode_message, encode_message, wire_size, MessageCodec};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{calculate_crc32, encode_frame, FrameCodec, HEADER_SIZE};
