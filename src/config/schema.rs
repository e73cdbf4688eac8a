//! Configuration schema definitions.
//!
//! [`ServerConfig`] is what the transport server consumes at start; it is
//! immutable once the server is running. [`HarnessConfig`] is the file form
//! read by the binary, with the server settings nested under `[server]`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::handler::{RequestHandler, SharedHandler};

/// Well-known port the test server listens on when none is given.
pub const DEFAULT_PORT: u16 = 4444;

/// Idle keep-alive timeout for plain connections.
pub const DEFAULT_KEEP_ALIVE_MS: u64 = 1000;

/// Upper bound the shutdown coordinator waits for a graceful close.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

/// Wire protocol served on the listening socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Unencrypted HTTP/1.1, one exchange at a time per connection.
    #[default]
    Plain,
    /// TLS-terminated HTTP/2, many concurrent streams per session.
    SecureMultiplexed,
}

impl TransportMode {
    pub fn is_secure(&self) -> bool {
        matches!(self, TransportMode::SecureMultiplexed)
    }

    /// URL scheme clients should use for this mode.
    pub fn scheme(&self) -> &'static str {
        match self {
            TransportMode::Plain => "http",
            TransportMode::SecureMultiplexed => "https",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Plain => write!(f, "plain"),
            TransportMode::SecureMultiplexed => write!(f, "secure-multiplexed"),
        }
    }
}

/// PEM-encoded private key and certificate chain.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub key: Vec<u8>,
    pub cert: Vec<u8>,
}

impl TlsMaterial {
    pub fn new(key: impl Into<Vec<u8>>, cert: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            cert: cert.into(),
        }
    }
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("key", &format_args!("<{} bytes>", self.key.len()))
            .field("cert", &format_args!("<{} bytes>", self.cert.len()))
            .finish()
    }
}

/// Transport server configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Request handler. `None` selects the built-in stream echo handler.
    #[serde(skip)]
    pub handler: Option<SharedHandler>,

    /// Materialise the whole request body before echoing it back.
    pub use_buffering: bool,

    /// Throttle rate in bytes per second for the stream echo handler.
    pub rate: Option<u64>,

    /// Bind host.
    pub host: String,

    /// Bind port, 0 for an ephemeral port.
    pub port: u16,

    /// Idle keep-alive timeout for plain connections, in milliseconds.
    pub keep_alive_ms: u64,

    /// Plain HTTP/1.1 or TLS HTTP/2.
    pub mode: TransportMode,

    /// Key and certificate for secure mode. Generated when absent.
    #[serde(skip)]
    pub tls: Option<TlsMaterial>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            handler: None,
            use_buffering: false,
            rate: None,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            keep_alive_ms: DEFAULT_KEEP_ALIVE_MS,
            mode: TransportMode::Plain,
            tls: None,
        }
    }
}

impl ServerConfig {
    /// Default configuration serving the built-in stream echo handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration serving `handler`.
    pub fn with_handler<H: RequestHandler>(handler: H) -> Self {
        Self::default().handler(handler)
    }

    pub fn handler<H: RequestHandler>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn shared_handler(mut self, handler: SharedHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn buffering(mut self, use_buffering: bool) -> Self {
        self.use_buffering = use_buffering;
        self
    }

    pub fn rate(mut self, bytes_per_sec: u64) -> Self {
        self.rate = Some(bytes_per_sec);
        self
    }

    pub fn keep_alive(mut self, timeout: Duration) -> Self {
        self.keep_alive_ms = timeout.as_millis() as u64;
        self
    }

    /// Switch to TLS HTTP/2. `None` generates a self-signed pair at start.
    pub fn secure(mut self, material: Option<TlsMaterial>) -> Self {
        self.mode = TransportMode::SecureMultiplexed;
        self.tls = material;
        self
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("handler", &self.handler.as_ref().map(|_| "<custom>"))
            .field("use_buffering", &self.use_buffering)
            .field("rate", &self.rate)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("keep_alive_ms", &self.keep_alive_ms)
            .field("mode", &self.mode)
            .field("tls", &self.tls)
            .finish()
    }
}

/// Root of the configuration file read by the binary.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub server: ServerConfig,

    /// Certificate and key files for secure mode.
    pub tls: Option<TlsConfig>,

    pub handler: HandlerKind,

    pub shutdown: ShutdownConfig,

    pub observability: ObservabilityConfig,
}

/// TLS files on disk.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Which built-in handler the binary serves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// Inspection endpoint answering with a JSON description of the request.
    #[default]
    Echo,
    /// Pipes the request body back as the response body.
    Stream,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ServerConfig::default();
        assert!(config.handler.is_none());
        assert!(!config.use_buffering);
        assert_eq!(config.rate, None);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.keep_alive_ms, 1000);
        assert_eq!(config.mode, TransportMode::Plain);
    }

    #[test]
    fn partial_file_config_keeps_defaults() {
        let config: HarnessConfig = toml::from_str(
            r#"
            handler = "stream"

            [server]
            port = 0
            rate = 2048
            mode = "secure_multiplexed"
            "#,
        )
        .unwrap();

        assert_eq!(config.handler, HandlerKind::Stream);
        assert_eq!(config.server.port, 0);
        assert_eq!(config.server.rate, Some(2048));
        assert!(config.server.mode.is_secure());
        assert_eq!(config.server.keep_alive_ms, DEFAULT_KEEP_ALIVE_MS);
        assert_eq!(config.shutdown.timeout_ms, DEFAULT_SHUTDOWN_TIMEOUT_MS);
    }

    #[test]
    fn tls_material_debug_hides_bytes() {
        let material = TlsMaterial::new("secret-key", "cert");
        let rendered = format!("{:?}", material);
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("10 bytes"));
    }
}
