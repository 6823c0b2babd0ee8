//! # Multiplexer Configuration
//!
//! Centralized defaults and configuration loading for every Multiplexer peer
//! and broker process.
//!
//! ## Usage
//!
//! ```rust
//! use config::{defaults, MultiplexerConfig};
//!
//! let config = MultiplexerConfig::default();
//! assert_eq!(config.server.port, defaults::server::PORT);
//! assert!(config.routing.rule_for(1000).is_none());
//! ```

pub mod defaults;
pub mod routing;
pub mod settings;

pub use routing::{RoutingRule, RoutingTable};
pub use settings::{
    ConnectionSettings, IdleOverride, IdleSettings, MultiplexerConfig, QuerySettings,
    ServerSettings,
};
