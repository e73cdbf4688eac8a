//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Close idle/open connections → Stop accepting → Drain
//!         ↘ timeout elapsed → Terminate whatever is left
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger shutdown of the binary's server
//! ```
//!
//! # Design Decisions
//! - Shutdown is bounded: a slow client cannot hold the port forever
//! - The listening socket is released on both the graceful and forced path

pub mod shutdown;
pub mod signals;

pub use shutdown::{stop, DEFAULT_STOP_TIMEOUT};
pub use signals::shutdown_signal;
