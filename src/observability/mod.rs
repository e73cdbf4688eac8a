//! Observability subsystem.
//!
//! Every subsystem logs through `tracing`; request spans come from
//! tower-http's `TraceLayer`, installed by the transport server.

pub mod logging;
