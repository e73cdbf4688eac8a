//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (plain) / TLS session (secure, ALPN h2)
//!     → server.rs (accept, register, hyper auto builder)
//!     → TraceLayer
//!     → cors.rs (preflight short-circuit, permissive headers)
//!     → handler.rs (dispatch, failure containment)
//!     → EchoHandler | StreamEcho | caller's handler
//! ```

pub mod cors;
pub mod echo;
pub mod form;
pub mod handler;
pub mod server;

pub use echo::{start_echo_server, EchoBody, EchoHandler};
pub use form::{FileInfo, FormData, FormParseError, FormParser, MultipartParser};
pub use handler::{HandlerError, Reply, RequestHandler, SharedHandler, StreamEcho};
pub use server::{ServerHandle, TransportServer};
