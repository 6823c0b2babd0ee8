//! Query failures

use network::{RoutingError, TransportError};
use thiserror::Error;
use types::MessageType;

#[derive(Error, Debug)]
pub enum QueryError {
    /// No answer before the deadline of the named phase
    #[error("Operation timed out in {phase}")]
    OperationTimeout { phase: &'static str },

    /// Every discovered backend rejected the request
    #[error("No backend reachable for message type {message_type}")]
    BackendUnreachable { message_type: MessageType },

    /// Nothing to send the request to
    #[error("Routing failed: {0}")]
    Routing(#[from] RoutingError),

    #[error("Transport failed: {0}")]
    Transport(#[from] TransportError),
}

impl QueryError {
    pub fn timeout(phase: &'static str) -> Self {
        Self::OperationTimeout { phase }
    }

    pub fn unreachable(message_type: MessageType) -> Self {
        Self::BackendUnreachable { message_type }
    }

    /// Timeouts and unreachable backends; the query ran but found no answer
    pub fn is_operation_failed(&self) -> bool {
        matches!(
            self,
            Self::OperationTimeout { .. } | Self::BackendUnreachable { .. }
        )
    }

    /// Phase that timed out, if this is a timeout
    pub fn timed_out_phase(&self) -> Option<&'static str> {
        match self {
            Self::OperationTimeout { phase } => Some(phase),
            _ => None,
        }
    }
}
