//! Broker Router
//!
//! Decides where each inbound application message goes, in order:
//!
//! 1. `to` set (and not the broker itself): forward to that peer id
//! 2. Override rules attached to the message: route by those
//! 3. By type: `PING` is answered, `BACKEND_FOR_PACKET_SEARCH` and
//!    application types follow the routing table
//!
//! Unroutable messages are dropped, or answered with `DELIVERY_ERROR` when
//! enabled.

use config::{RoutingRule, RoutingTable};
use network::{Connection, ConnectionManager, Incoming, MessageListener, SendPolicy};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use types::{Fanout, MessageType, MetaType, MultiplexerMessage, PeerType};

/// What happened to one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued to at least one peer, or answered by the broker
    Delivered,
    /// A destination was named but no live peer matched
    Unroutable,
    /// Logged and dropped without a delivery error
    Ignored,
}

#[derive(Debug, Clone)]
pub struct BrokerRouter {
    routing: RoutingTable,
    emit_delivery_errors: bool,
}

impl BrokerRouter {
    pub fn new(routing: RoutingTable, emit_delivery_errors: bool) -> Self {
        Self {
            routing,
            emit_delivery_errors,
        }
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn route(
        &self,
        manager: &ConnectionManager,
        message: &MultiplexerMessage,
        connection: &Arc<Connection>,
    ) -> RouteOutcome {
        if let Some(target) = message.to.filter(|to| *to != manager.instance_id()) {
            return match manager.send(message.clone(), SendPolicy::ViaPeerId(target)) {
                Ok(_) => {
                    trace!(id = message.id, target, "Forwarded to peer");
                    RouteOutcome::Delivered
                }
                Err(e) => {
                    debug!(id = message.id, error = %e, "Addressed peer not connected");
                    RouteOutcome::Unroutable
                }
            };
        }

        if !message.override_routing_rules.is_empty() {
            let mut delivered = false;
            for rule in &message.override_routing_rules {
                delivered |= self.send_to_type(manager, message, rule.peer_type, rule.fanout());
            }
            return outcome(delivered);
        }

        match message.meta_type() {
            Some(MetaType::Ping) => self.answer_ping(manager, message, connection),
            Some(MetaType::BackendForPacketSearch) => match message.packet_search() {
                Ok(search) => self.route_by_rule(manager, message, search.packet_type),
                Err(e) => {
                    warn!(id = message.id, error = %e, "Malformed backend search");
                    RouteOutcome::Ignored
                }
            },
            Some(other) => {
                warn!(meta = ?other, id = message.id, from = message.from, "Don't know what to do with meta message");
                RouteOutcome::Ignored
            }
            None if message.message_type == 0 => {
                warn!(id = message.id, from = message.from, "Message has neither type nor target");
                RouteOutcome::Ignored
            }
            None if message.is_meta() => {
                warn!(
                    id = message.id,
                    message_type = message.message_type,
                    "Unknown reserved message type"
                );
                RouteOutcome::Ignored
            }
            None => self.route_by_rule(manager, message, message.message_type),
        }
    }

    fn answer_ping(
        &self,
        manager: &ConnectionManager,
        ping: &MultiplexerMessage,
        connection: &Arc<Connection>,
    ) -> RouteOutcome {
        if ping.from == 0 {
            debug!(id = ping.id, "Anonymous ping ignored");
            return RouteOutcome::Ignored;
        }
        let pong = manager
            .create_response(ping, MetaType::Ping.code())
            .build();
        match manager.send(pong, SendPolicy::ViaConnection(Arc::clone(connection))) {
            Ok(_) => RouteOutcome::Delivered,
            Err(_) => RouteOutcome::Ignored,
        }
    }

    fn route_by_rule(
        &self,
        manager: &ConnectionManager,
        message: &MultiplexerMessage,
        message_type: MessageType,
    ) -> RouteOutcome {
        let Some(RoutingRule {
            peer_types, fanout, ..
        }) = self.routing.rule_for(message_type)
        else {
            debug!(id = message.id, message_type, "No routing rule");
            return RouteOutcome::Unroutable;
        };

        let mut delivered = false;
        for peer_type in peer_types {
            delivered |= self.send_to_type(manager, message, *peer_type, *fanout);
        }
        outcome(delivered)
    }

    fn send_to_type(
        &self,
        manager: &ConnectionManager,
        message: &MultiplexerMessage,
        peer_type: PeerType,
        fanout: Fanout,
    ) -> bool {
        let policy = match fanout {
            Fanout::One => SendPolicy::OneOfType(peer_type),
            Fanout::All => SendPolicy::AllOfType(peer_type),
        };
        match manager.send(message.clone(), policy) {
            Ok(sent) => {
                trace!(
                    id = message.id,
                    peer_type,
                    peer_name = self.routing.peer_name(peer_type).unwrap_or("-"),
                    targets = sent.len(),
                    "Routed"
                );
                true
            }
            Err(e) => {
                debug!(id = message.id, peer_type, error = %e, "No route");
                false
            }
        }
    }

    fn undeliverable(
        &self,
        manager: &ConnectionManager,
        message: &MultiplexerMessage,
        connection: &Arc<Connection>,
    ) {
        // Errors about errors would bounce forever.
        if !self.emit_delivery_errors || message.is_error() || message.from == 0 {
            warn!(
                id = message.id,
                from = message.from,
                message_type = message.message_type,
                to = ?message.to,
                "Undeliverable message dropped"
            );
            return;
        }

        let reason = format!("no route for message type {}", message.message_type);
        let error = manager
            .create_response(message, MetaType::DeliveryError.code())
            .payload(reason.into_bytes())
            .build();
        if let Err(e) = manager.send(error, SendPolicy::ViaConnection(Arc::clone(connection))) {
            debug!(id = message.id, error = %e, "Sender gone before delivery error");
        }
    }
}

impl MessageListener for BrokerRouter {
    fn on_message(&self, manager: &ConnectionManager, incoming: Incoming) {
        let Incoming {
            message,
            connection,
        } = incoming;
        if self.route(manager, &message, &connection) == RouteOutcome::Unroutable {
            self.undeliverable(manager, &message, &connection);
        }
    }
}

fn outcome(delivered: bool) -> RouteOutcome {
    if delivered {
        RouteOutcome::Delivered
    } else {
        RouteOutcome::Unroutable
    }
}
