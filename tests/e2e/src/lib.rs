//! End-to-End Test Framework for the Multiplexer
//!
//! Runs a real broker on loopback TCP and drives it with clients, backends
//! and raw sockets.

pub mod fixtures;
pub mod framework;

pub use fixtures::*;
pub use framework::*;
