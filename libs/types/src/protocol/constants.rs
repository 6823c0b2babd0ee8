//! Protocol constants and basic types
//!
//! Meta message type codes and well-known peer types shared by every peer.
//! Codes up to [`MAX_RESERVED_TYPE`] belong to the broker protocol; the two
//! compatibility codes above it ([`MetaType::RequestReceived`] and
//! [`MetaType::BackendError`]) are meta messages as well.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 64-bit identifier of one message instance
pub type MessageId = i64;

/// 64-bit instance identifier of a peer process
pub type PeerId = i64;

/// Application or meta message type code
pub type MessageType = i32;

/// Small integer naming a class of peers
pub type PeerType = i32;

/// Highest message type code reserved for broker meta messages
pub const MAX_RESERVED_TYPE: MessageType = 99;

/// Largest accepted frame payload (128 MiB)
pub const MAX_MESSAGE_SIZE: usize = 128 * 1024 * 1024;

/// Well-known peer types
pub mod peers {
    use super::PeerType;

    /// The routing hub every other peer connects to
    pub const MULTIPLEXER: PeerType = 1;
    /// Wildcard used by routing rules that target every peer type
    pub const ALL_TYPES: PeerType = 2;
}

/// Protocol-internal message types
#[repr(i32)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoPrimitive, TryFromPrimitive,
)]
pub enum MetaType {
    Ping = 1,
    ConnectionWelcome = 2,
    BackendForPacketSearch = 3,
    Heartbit = 4,
    DeliveryError = 5,
    /// Kept for wire compatibility with older peers; never generated here.
    RequestReceived = 113,
    BackendError = 114,
}

impl MetaType {
    /// Resolve a raw type code into a meta type, if it is one
    pub fn from_code(code: MessageType) -> Option<Self> {
        Self::try_from(code).ok()
    }

    pub const fn code(self) -> MessageType {
        self as MessageType
    }

    /// Error responses that terminate or redirect a query
    pub const fn is_error(self) -> bool {
        matches!(self, MetaType::DeliveryError | MetaType::BackendError)
    }
}

/// True when `code` is handled by the protocol rather than by applications
pub fn is_meta_type(code: MessageType) -> bool {
    code <= MAX_RESERVED_TYPE || MetaType::from_code(code).is_some()
}

/// Errors raised while interpreting typed payloads
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("message {id} of type {message_type} carries no payload")]
    Missing { id: MessageId, message_type: MessageType },

    #[error("malformed {what} payload: {source}")]
    Malformed {
        what: &'static str,
        #[source]
        source: prost::DecodeError,
    },
}
