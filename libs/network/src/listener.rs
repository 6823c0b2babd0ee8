//! Inbound dispatch
//!
//! Messages that survive the handshake, heartbeat and duplicate filters are
//! handed to the manager's [`MessageListener`].

use crate::connection::Connection;
use crate::manager::ConnectionManager;
use std::sync::Arc;
use types::MultiplexerMessage;

/// An application message and the connection it arrived on
#[derive(Debug, Clone)]
pub struct Incoming {
    pub message: MultiplexerMessage,
    pub connection: Arc<Connection>,
}

/// Receiver of inbound application traffic.
///
/// Runs on the connection's reader task: it must not block. Hand work off to
/// a channel or queue writes through `manager`.
pub trait MessageListener: Send + Sync + 'static {
    fn on_message(&self, manager: &ConnectionManager, incoming: Incoming);
}

/// Forward every inbound message into an unbounded channel
impl MessageListener for tokio::sync::mpsc::UnboundedSender<Incoming> {
    fn on_message(&self, _manager: &ConnectionManager, incoming: Incoming) {
        if self.send(incoming).is_err() {
            tracing::debug!("Listener channel closed, dropping inbound message");
        }
    }
}
