//! Message construction
//!
//! Every envelope gets a fresh random id and the current Unix timestamp when
//! its builder is created. Retransmissions build a new message, so ids are
//! never reused.

use super::{Fanout, MultiplexerMessage, RoutingOverride};
use crate::protocol::constants::{MessageId, MessageType, MetaType, PeerId, PeerType};
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// Fresh process-random 64-bit identifier
pub fn random_id() -> i64 {
    rand::random::<i64>()
}

/// Seconds since the Unix epoch, saturating at `i32::MAX`
pub fn unix_timestamp() -> i32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().min(i32::MAX as u64) as i32)
        .unwrap_or(0)
}

/// Builder for [`MultiplexerMessage`]
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    message: MultiplexerMessage,
}

impl MessageBuilder {
    /// Start a new message of `message_type`
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message: MultiplexerMessage {
                id: random_id(),
                message_type,
                timestamp: unix_timestamp(),
                ..Default::default()
            },
        }
    }

    pub fn meta(meta: MetaType) -> Self {
        Self::new(meta.code())
    }

    /// Start a response to `request`.
    ///
    /// Sets `references` to the request id, addresses it back to the request's
    /// sender and carries the workflow tag over.
    pub fn response_to(request: &MultiplexerMessage, message_type: MessageType) -> Self {
        let mut builder = Self::new(message_type);
        builder.message.references = Some(request.id);
        builder.message.to = Some(request.from);
        builder.message.workflow = request.workflow.clone();
        builder
    }

    pub fn from(mut self, sender: PeerId) -> Self {
        self.message.from = sender;
        self
    }

    pub fn to(mut self, target: PeerId) -> Self {
        self.message.to = Some(target);
        self
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.message.message = Some(payload.into());
        self
    }

    /// Encode a typed payload into the message body
    pub fn encoded_payload<M: prost::Message>(self, payload: &M) -> Self {
        self.payload(payload.encode_to_vec())
    }

    pub fn references(mut self, id: MessageId) -> Self {
        self.message.references = Some(id);
        self
    }

    pub fn workflow(mut self, workflow: impl Into<Bytes>) -> Self {
        self.message.workflow = Some(workflow.into());
        self
    }

    /// Route to `peer_type` with `fanout` instead of the broker's table
    pub fn route_override(mut self, peer_type: PeerType, fanout: Fanout) -> Self {
        self.message.override_routing_rules.push(RoutingOverride {
            peer_type,
            fanout: fanout as i32,
        });
        self
    }

    /// Id the built message will carry
    pub fn id(&self) -> MessageId {
        self.message.id
    }

    pub fn build(self) -> MultiplexerMessage {
        self.message
    }
}
