//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, accept)
//!     → connection.rs (register in the ConnectionRegistry)
//!     → tls.rs (TLS handshake, secure-multiplexed mode only)
//!     → Hand off to HTTP layer
//!
//! Connection States:
//!     Accepted → [Handshaking] → Serving → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - Each connection is tracked from accept so shutdown can force it closed
//! - The registry belongs to one server instance, never a global
//! - TLS only advertises `h2`; plain mode never sees TLS

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionId, ConnectionKind, ConnectionRegistry};
pub use listener::{BindError, Listener};
