//! Multiplexer Network Infrastructure
//!
//! Multiplexes many TCP connections into logical peer-type groups:
//!
//! - [`ConnectionManager`]: dialing, accepting, the welcome handshake,
//!   heartbeats, idle timeouts, de-duplication and automatic reconnection
//! - [`PeerRegistry`]: peer type → round-robin set, peer id → connection
//! - [`SendPolicy`] / [`SendGroup`]: addressing and write completion
//! - [`MessageListener`]: where inbound application traffic goes
//! - [`TrafficObserver`]: byte/message accounting hook

pub mod connection;
pub mod error;
pub mod listener;
pub mod manager;
pub mod metrics;
pub mod recent;
pub mod registry;
pub mod send;

pub use connection::{Connection, ConnectionId, PeerIdentity};
pub use error::{Result, RoutingError, TransportError};
pub use listener::{Incoming, MessageListener};
pub use manager::{ConnectionManager, ConnectionManagerBuilder};
pub use metrics::{NoopObserver, TrafficObserver};
pub use recent::RecentIdPool;
pub use registry::PeerRegistry;
pub use send::{PendingWrites, SendGroup, SendPolicy, WriteHandle, WriteStatus};
