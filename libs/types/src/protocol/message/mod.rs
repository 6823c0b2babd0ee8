//! # Message Envelope and Handshake Payloads
//!
//! ## Purpose
//!
//! Defines the versioned envelope every peer exchanges, plus the small typed
//! payloads carried inside meta messages. All structs are tag-length-value
//! encoded with stable field numbers, so older and newer peers interoperate
//! as long as field numbers are never reused.
//!
//! ## Wire Schema
//!
//! ```text
//! MultiplexerMessage
//!   1  id                      int64
//!   2  from                    int64
//!   3  to                      int64   (optional)
//!   4  type                    int32
//!   5  message                 bytes   (optional)
//!   6  references              int64   (optional)
//!   7  timestamp               int32   (seconds since epoch)
//!   8  workflow                bytes   (optional)
//!   9  override_routing_rules  repeated RoutingOverride
//!
//! WelcomeMessage          1 type int32, 2 id int64, 3 password bytes (optional)
//! BackendForPacketSearch  1 packet_type int32
//! RoutingOverride         1 peer_type int32, 2 fanout enum
//! ```
//!
//! ## Invariants
//!
//! - Responses set `references` to the request id and default `to` to the
//!   request's `from` (see [`builder::MessageBuilder::response_to`]).
//! - Envelopes are not mutated after construction; use the builder.

pub mod builder;

use crate::protocol::constants::{
    is_meta_type, MessageId, MetaType, PayloadError, PeerId, PeerType,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The unit every component exchanges
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MultiplexerMessage {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(int64, tag = "2")]
    pub from: i64,
    #[prost(int64, optional, tag = "3")]
    pub to: ::core::option::Option<i64>,
    #[prost(int32, tag = "4")]
    pub message_type: i32,
    #[prost(bytes = "bytes", optional, tag = "5")]
    pub message: ::core::option::Option<Bytes>,
    #[prost(int64, optional, tag = "6")]
    pub references: ::core::option::Option<i64>,
    #[prost(int32, tag = "7")]
    pub timestamp: i32,
    #[prost(bytes = "bytes", optional, tag = "8")]
    pub workflow: ::core::option::Option<Bytes>,
    #[prost(message, repeated, tag = "9")]
    pub override_routing_rules: ::prost::alloc::vec::Vec<RoutingOverride>,
}

/// Handshake payload carried by `CONNECTION_WELCOME`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WelcomeMessage {
    #[prost(int32, tag = "1")]
    pub peer_type: i32,
    #[prost(int64, tag = "2")]
    pub id: i64,
    #[prost(bytes = "bytes", optional, tag = "3")]
    pub password: ::core::option::Option<Bytes>,
}

/// Discovery probe payload carried by `BACKEND_FOR_PACKET_SEARCH`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BackendForPacketSearch {
    #[prost(int32, tag = "1")]
    pub packet_type: i32,
}

/// Explicit routing instruction attached by the sender
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoutingOverride {
    #[prost(int32, tag = "1")]
    pub peer_type: i32,
    #[prost(enumeration = "Fanout", tag = "2")]
    pub fanout: i32,
}

/// How many peers of a type receive a routed message
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    ::prost::Enumeration,
)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum Fanout {
    /// Round-robin to a single live peer
    One = 0,
    /// Broadcast to every live peer
    All = 1,
}

impl MultiplexerMessage {
    /// Meta type of this message, if it is one
    pub fn meta_type(&self) -> Option<MetaType> {
        MetaType::from_code(self.message_type)
    }

    pub fn is_meta(&self) -> bool {
        is_meta_type(self.message_type)
    }

    /// True for `DELIVERY_ERROR` and `BACKEND_ERROR`
    pub fn is_error(&self) -> bool {
        self.meta_type().is_some_and(MetaType::is_error)
    }

    pub fn is_type(&self, meta: MetaType) -> bool {
        self.message_type == meta.code()
    }

    /// Payload bytes, empty when none was attached
    pub fn payload(&self) -> &[u8] {
        self.message.as_deref().unwrap_or_default()
    }

    pub fn references_id(&self, id: MessageId) -> bool {
        self.references == Some(id)
    }

    /// Decode the welcome handshake payload
    pub fn welcome(&self) -> Result<WelcomeMessage, PayloadError> {
        self.decode_payload("welcome")
    }

    /// Decode the packet type a discovery probe is looking for
    pub fn packet_search(&self) -> Result<BackendForPacketSearch, PayloadError> {
        self.decode_payload("backend search")
    }

    fn decode_payload<M: ::prost::Message + Default>(
        &self,
        what: &'static str,
    ) -> Result<M, PayloadError> {
        let bytes = self.message.as_ref().ok_or(PayloadError::Missing {
            id: self.id,
            message_type: self.message_type,
        })?;
        M::decode(bytes.as_ref()).map_err(|source| PayloadError::Malformed { what, source })
    }
}

impl WelcomeMessage {
    pub fn new(peer_type: PeerType, id: PeerId, password: Option<&str>) -> Self {
        Self {
            peer_type,
            id,
            password: password.map(|p| Bytes::copy_from_slice(p.as_bytes())),
        }
    }

    /// Compare against the configured shared secret.
    ///
    /// An absent password equals the empty string.
    pub fn password_matches(&self, expected: &str) -> bool {
        self.password.as_deref().unwrap_or_default() == expected.as_bytes()
    }
}
