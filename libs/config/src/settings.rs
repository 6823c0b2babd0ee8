//! Multiplexer configuration loading
//!
//! Every section is optional in the file; missing values fall back to
//! [`crate::defaults`]. Environment variables override the file using the
//! `MULTIPLEXER__SECTION__KEY` form, e.g. `MULTIPLEXER__SERVER__PORT=4000`.

use crate::defaults;
use crate::routing::RoutingTable;
use anyhow::{Context, Result};
use config_crate::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use types::PeerType;

const ENV_PREFIX: &str = "MULTIPLEXER";

/// Complete configuration for a peer or broker process
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MultiplexerConfig {
    pub connection: ConnectionSettings,
    pub query: QuerySettings,
    pub routing: RoutingTable,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connect_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub recent_id_capacity: usize,
    /// Shared secret presented in (and required from) welcome messages
    pub password: Option<String>,
    pub idle: IdleSettings,
    /// Per peer-type replacements for `idle`
    pub idle_overrides: Vec<IdleOverride>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: defaults::connection::CONNECT_TIMEOUT_MS,
            reconnect_delay_ms: defaults::connection::RECONNECT_DELAY_MS,
            recent_id_capacity: defaults::connection::RECENT_ID_CAPACITY,
            password: None,
            idle: IdleSettings::default(),
            idle_overrides: Vec::new(),
        }
    }
}

impl ConnectionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Idle thresholds for connections to peers of `peer_type`
    pub fn idle_for(&self, peer_type: PeerType) -> IdleSettings {
        self.idle_overrides
            .iter()
            .find(|o| o.peer_type == peer_type)
            .map(|o| IdleSettings {
                read_idle_ms: o.read_idle_ms,
                write_idle_ms: o.write_idle_ms,
            })
            .unwrap_or(self.idle)
    }

    /// Shared secret, with an absent password meaning the empty string
    pub fn password_or_empty(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct IdleSettings {
    pub read_idle_ms: u64,
    pub write_idle_ms: u64,
}

impl Default for IdleSettings {
    fn default() -> Self {
        Self {
            read_idle_ms: defaults::idle::READ_IDLE_MS,
            write_idle_ms: defaults::idle::WRITE_IDLE_MS,
        }
    }
}

impl IdleSettings {
    pub fn read_idle(&self) -> Duration {
        Duration::from_millis(self.read_idle_ms)
    }

    pub fn write_idle(&self) -> Duration {
        Duration::from_millis(self.write_idle_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct IdleOverride {
    pub peer_type: PeerType,
    pub read_idle_ms: u64,
    pub write_idle_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct QuerySettings {
    pub cleanup_grace_ms: u64,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            cleanup_grace_ms: defaults::query::CLEANUP_GRACE_MS,
        }
    }
}

impl QuerySettings {
    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Seconds between traffic summaries; 0 disables them
    pub stats_interval_secs: u64,
    /// Answer unroutable requests with DELIVERY_ERROR instead of dropping them
    pub emit_delivery_errors: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: defaults::server::HOST.to_string(),
            port: defaults::server::PORT,
            stats_interval_secs: 0,
            emit_delivery_errors: false,
        }
    }
}

impl ServerSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}

impl MultiplexerConfig {
    /// Load from an optional TOML file, then apply `MULTIPLEXER__*` overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading configuration from {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        } else {
            debug!("No configuration file given, using defaults");
        }

        builder = builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Parse an in-memory TOML document, without environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}
