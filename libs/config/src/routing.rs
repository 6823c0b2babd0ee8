//! Resolved routing table
//!
//! The broker only consumes this resolved form. Whatever produced it (a rules
//! file, a generator, a test) is outside the core.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use types::{Fanout, MessageType, PeerType};

/// Where messages of one type go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub message_type: MessageType,
    pub peer_types: Vec<PeerType>,
    #[serde(default = "default_fanout")]
    pub fanout: Fanout,
}

fn default_fanout() -> Fanout {
    Fanout::One
}

/// Message type → target peer types, plus peer names for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingTable {
    pub rules: Vec<RoutingRule>,
    pub peers: HashMap<String, PeerType>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the rule for `message_type`
    pub fn with_rule(
        mut self,
        message_type: MessageType,
        peer_types: impl Into<Vec<PeerType>>,
        fanout: Fanout,
    ) -> Self {
        self.rules.retain(|r| r.message_type != message_type);
        self.rules.push(RoutingRule {
            message_type,
            peer_types: peer_types.into(),
            fanout,
        });
        self
    }

    pub fn with_peer(mut self, name: impl Into<String>, peer_type: PeerType) -> Self {
        self.peers.insert(name.into(), peer_type);
        self
    }

    pub fn rule_for(&self, message_type: MessageType) -> Option<&RoutingRule> {
        self.rules.iter().find(|r| r.message_type == message_type)
    }

    pub fn peer_type(&self, name: &str) -> Option<PeerType> {
        self.peers.get(name).copied()
    }

    /// Reverse lookup used when logging
    pub fn peer_name(&self, peer_type: PeerType) -> Option<&str> {
        self.peers
            .iter()
            .find(|(_, t)| **t == peer_type)
            .map(|(name, _)| name.as_str())
    }
}
