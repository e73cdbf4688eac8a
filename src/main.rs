//! Fixture server binary.
//!
//! ```text
//! fixture-server [--config FILE] [--port N] [--secure] [--rate BYTES] ...
//! ```
//!
//! Command line flags override values from the configuration file.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use fixture_server::config::{load_config, HandlerKind, HarnessConfig, TransportMode};
use fixture_server::config::loader::read_tls_material;
use fixture_server::http::{EchoHandler, StreamEcho};
use fixture_server::lifecycle::{shutdown_signal, stop};
use fixture_server::observability::logging;
use fixture_server::TransportServer;

#[derive(Parser)]
#[command(name = "fixture-server")]
#[command(about = "HTTP/1.1 and HTTP/2 test server with controllable timing", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    /// Port to listen on, 0 for an ephemeral port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve TLS HTTP/2 instead of plain HTTP/1.1.
    #[arg(long)]
    secure: bool,

    /// PEM certificate; a self-signed one is generated when omitted.
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Throttle echoed bodies to this many bytes per second.
    #[arg(long)]
    rate: Option<u64>,

    /// Buffer request bodies fully before echoing them.
    #[arg(long)]
    buffering: bool,

    #[arg(long)]
    keep_alive_ms: Option<u64>,

    #[arg(long, value_enum)]
    handler: Option<HandlerArg>,

    #[arg(long)]
    shutdown_timeout_ms: Option<u64>,

    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum HandlerArg {
    Echo,
    Stream,
}

impl From<HandlerArg> for HandlerKind {
    fn from(arg: HandlerArg) -> Self {
        match arg {
            HandlerArg::Echo => HandlerKind::Echo,
            HandlerArg::Stream => HandlerKind::Stream,
        }
    }
}

impl Cli {
    fn into_config(self) -> Result<HarnessConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => HarnessConfig::default(),
        };

        let server = &mut config.server;
        if let Some(host) = self.host {
            server.host = host;
        }
        if let Some(port) = self.port {
            server.port = port;
        }
        if self.secure {
            server.mode = TransportMode::SecureMultiplexed;
        }
        if let (Some(cert), Some(key)) = (&self.cert, &self.key) {
            server.tls = Some(read_tls_material(key, cert)?);
        }
        if let Some(rate) = self.rate {
            server.rate = Some(rate);
        }
        if self.buffering {
            server.use_buffering = true;
        }
        if let Some(ms) = self.keep_alive_ms {
            server.keep_alive_ms = ms;
        }
        if let Some(handler) = self.handler {
            config.handler = handler.into();
        }
        if let Some(ms) = self.shutdown_timeout_ms {
            config.shutdown.timeout_ms = ms;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config()?;

    logging::init(&config.observability.log_level);

    tracing::info!("fixture-server v{} starting", env!("CARGO_PKG_VERSION"));

    let server_config = match config.handler {
        HandlerKind::Echo => config.server.clone().handler(EchoHandler::new()),
        HandlerKind::Stream => {
            let stream = StreamEcho::new(config.server.use_buffering, config.server.rate);
            config.server.clone().handler(stream)
        }
    };

    let handle = TransportServer::start(server_config).await?;

    tracing::info!(url = %handle.url(), handler = ?config.handler, "Listening for connections");

    shutdown_signal().await;

    stop(handle, Duration::from_millis(config.shutdown.timeout_ms)).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
