//! Traffic observation hook
//!
//! The connection manager reports every frame crossing the codec boundary to
//! an installed [`TrafficObserver`]. It keeps no statistics of its own.

use crate::connection::Connection;
use types::MultiplexerMessage;

/// Subscriber for per-connection traffic events.
///
/// Called from reader and writer tasks, so implementations must be cheap and
/// must not block.
pub trait TrafficObserver: Send + Sync + 'static {
    fn on_received(&self, _connection: &Connection, _message: &MultiplexerMessage, _wire_bytes: usize) {}

    fn on_sent(&self, _connection: &Connection, _message: &MultiplexerMessage, _wire_bytes: usize) {}

    fn on_opened(&self, _connection: &Connection) {}

    fn on_closed(&self, _connection: &Connection) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TrafficObserver for NoopObserver {}
