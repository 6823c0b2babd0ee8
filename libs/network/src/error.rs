//! Transport Error Types
//!
//! Connection-scoped failures (`TransportError`) and synchronous registry
//! lookup failures (`RoutingError`).

use codec::ProtocolError;
use std::net::SocketAddr;
use thiserror::Error;
use types::{PeerId, PeerType};

/// Failures of a single connection or connect attempt
#[derive(Error, Debug)]
pub enum TransportError {
    /// TCP connect refused, unreachable or timed out
    #[error("Connect to {remote_addr} failed: {message}")]
    Connect {
        remote_addr: SocketAddr,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Shared-secret check failed during the welcome handshake
    #[error("Password mismatch in welcome from {remote_addr}")]
    PasswordMismatch { remote_addr: SocketAddr },

    /// Peer closed the socket before answering our welcome, as a server does
    /// when it rejects our password
    #[error("Connection to {remote_addr} closed during welcome handshake")]
    HandshakeClosed { remote_addr: SocketAddr },

    /// Connection closed before the operation completed
    #[error("Connection {connection} closed: {reason}")]
    ConnectionClosed { connection: u64, reason: String },

    /// The connection manager is shutting down
    #[error("Connection manager is shut down")]
    Shutdown,

    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Corrupt stream
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    pub fn connect(remote_addr: SocketAddr, source: std::io::Error) -> Self {
        Self::Connect {
            remote_addr,
            message: source.to_string(),
            source: Some(source),
        }
    }

    pub fn handshake(remote_addr: SocketAddr, message: impl Into<String>) -> Self {
        Self::Connect {
            remote_addr,
            message: message.into(),
            source: None,
        }
    }

    pub fn password_mismatch(remote_addr: SocketAddr) -> Self {
        Self::PasswordMismatch { remote_addr }
    }

    pub fn handshake_closed(remote_addr: SocketAddr) -> Self {
        Self::HandshakeClosed { remote_addr }
    }

    pub fn closed(connection: u64, reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            connection,
            reason: reason.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Whether a reconnect loop should keep trying after this error
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::PasswordMismatch { .. } | Self::Shutdown)
    }
}

/// No live connection satisfies a send policy
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingError {
    #[error("No live peer of type {0}")]
    NoPeerForType(PeerType),

    #[error("No live peer with id {0}")]
    NoPeerForPeerId(PeerId),

    /// Explicit connection was already closed
    #[error("Connection {0} is closed")]
    ConnectionClosed(u64),
}
