//! Protocol layer modules
//!
//! Wire structs for the envelope and its typed payloads, and the constants
//! every peer agrees on. Framing lives in the codec crate.

pub mod constants;
pub mod message;

pub use constants::{
    is_meta_type, peers, MessageId, MessageType, MetaType, PayloadError, PeerId, PeerType,
    MAX_MESSAGE_SIZE, MAX_RESERVED_TYPE,
};
pub use message::builder::{random_id, unix_timestamp, MessageBuilder};
pub use message::{
    BackendForPacketSearch, Fanout, MultiplexerMessage, RoutingOverride, WelcomeMessage,
};
