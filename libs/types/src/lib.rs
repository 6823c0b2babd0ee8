//! # Multiplexer Types
//!
//! Shared data model for every Multiplexer peer: the message envelope, the
//! handshake and discovery payloads, and the reserved type codes.
//!
//! ## Quick Start
//!
//! ```rust
//! use types::{MessageBuilder, MetaType};
//!
//! let request = MessageBuilder::new(1000).from(42).payload(&b"hello"[..]).build();
//! let reply = MessageBuilder::response_to(&request, 1001).from(7).build();
//!
//! assert_eq!(reply.references, Some(request.id));
//! assert_eq!(reply.to, Some(42));
//! assert!(!reply.is_type(MetaType::Ping));
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Frame encoding (belongs in codec/)
//! - Socket management or routing (belongs in network/ and messaging/)

pub mod protocol;

pub use protocol::*;
