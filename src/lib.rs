//! Protocol-dual HTTP test server.
//!
//! Serves plain HTTP/1.1 or TLS HTTP/2 with controllable behavior (delays,
//! throttling, chunked delivery, abrupt termination) for exercising HTTP
//! clients in tests.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod pipeline;
pub mod streams;

pub use config::{ServerConfig, TlsMaterial, TransportMode};
pub use http::{start_echo_server, EchoHandler, ServerHandle, StreamEcho, TransportServer};
pub use lifecycle::stop;
pub use net::BindError;
