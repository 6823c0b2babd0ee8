//! # Multiplexer Client
//!
//! Client-side messaging on top of the connection substrate:
//!
//! - [`MultiplexerClient`]: events, correlated queries with backend
//!   discovery failover, and an inbox for everything else
//! - [`CorrelationTable`]: message id → waiting query
//! - [`Backend`] / [`MessageHandler`] / [`MessageContext`]: serving requests

pub mod backend;
pub mod client;
pub mod correlation;
pub mod error;
pub mod query;

pub use backend::{Backend, MessageContext, MessageHandler};
pub use client::MultiplexerClient;
pub use correlation::CorrelationTable;
pub use error::QueryError;
pub use query::QueryResult;
