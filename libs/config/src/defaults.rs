//! Default values shared by every Multiplexer peer

/// Connection management defaults
pub mod connection {
    /// Time allowed for TCP connect plus welcome handshake
    pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

    /// Delay before re-dialing a dropped outbound connection
    pub const RECONNECT_DELAY_MS: u64 = 3_000;

    /// Capacity of the recently-seen message id pool
    pub const RECENT_ID_CAPACITY: usize = 20_000;
}

/// Liveness defaults
pub mod idle {
    /// Close a connection after this long without inbound traffic
    pub const READ_IDLE_MS: u64 = 7_000;

    /// Send a heartbeat after this long without outbound traffic
    pub const WRITE_IDLE_MS: u64 = 3_000;
}

/// Query engine defaults
pub mod query {
    /// Grace period before a finished query's ids leave the correlation table
    pub const CLEANUP_GRACE_MS: u64 = 5_000;
}

/// Broker server defaults
pub mod server {
    pub const HOST: &str = "0.0.0.0";
    pub const PORT: u16 = 31889;
}
