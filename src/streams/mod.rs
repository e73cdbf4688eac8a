//! Synthetic stream generators.
//!
//! # Data Flow
//! ```text
//! push.rs  GeneratedStream: producer sleeps between chunks
//!              → response body / client request body / pipeline source
//! pull.rs  PullPaced: each consumer pull waits, then yields one chunk
//!              → response body / client request body
//! sink.rs  EchoSink: drains any of the above, counting bytes
//! ```
//!
//! # Design Decisions
//! - Generators are lazy and single-use (`into_stream` consumes them)
//! - Timers live inside the stream future, so dropping the stream cancels them
//! - Exhausted streams are fused and keep returning `None`

pub mod pull;
pub mod push;
pub mod sink;

pub use pull::PullPaced;
pub use push::{generate, GeneratedStream};
pub use sink::EchoSink;
