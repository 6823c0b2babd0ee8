//! # Multiplexer Broker
//!
//! Central router of a Multiplexer deployment. Peers connect, complete the
//! welcome handshake and send envelopes; the broker forwards each one by
//! explicit target, by per-message override rules or by the routing table.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use broker::Broker;
//! use config::MultiplexerConfig;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let broker = Broker::new(MultiplexerConfig::load(None)?);
//! let listener = broker.listen().await?;
//! broker.serve(listener).await
//! # }
//! ```

pub mod router;
pub mod server;
pub mod stats;

pub use router::{BrokerRouter, RouteOutcome};
pub use server::Broker;
pub use stats::{TrafficCounters, TrafficSnapshot};
