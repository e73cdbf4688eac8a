//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)             builder calls in tests
//!     → loader.rs (parse)            → ServerConfig::with_handler(..).port(0)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (immutable once the server starts)
//!     → TransportServer::start
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Handler and TLS material are runtime-only and never serialized
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    HandlerKind, HarnessConfig, ServerConfig, TlsConfig, TlsMaterial, TransportMode, DEFAULT_PORT,
    DEFAULT_SHUTDOWN_TIMEOUT_MS,
};
pub use validation::ValidationError;
