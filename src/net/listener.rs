//! TCP listener binding.
//!
//! # Responsibilities
//! - Resolve and bind the configured host/port
//! - Classify bind failures into [`BindError`]
//! - Accept incoming TCP connections

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::{lookup_host, TcpListener, TcpStream};

use crate::config::ValidationError;

/// Fatal server startup failure.
#[derive(Debug, Error)]
pub enum BindError {
    /// Configuration failed validation.
    #[error("invalid server configuration: {}", join(.0))]
    InvalidConfig(Vec<ValidationError>),

    /// Host/port could not be resolved to a socket address.
    #[error("invalid bind address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Another socket already listens on the address.
    #[error("address {address} is already in use")]
    AddrInUse {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The process may not bind the address (privileged port).
    #[error("permission denied binding {address}")]
    PermissionDenied {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {address}: {source}")]
    Io {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Key or certificate could not be loaded.
    #[error("invalid TLS material: {0}")]
    Tls(String),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl BindError {
    fn from_io(address: SocketAddr, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::AddrInUse => BindError::AddrInUse { address, source },
            io::ErrorKind::PermissionDenied => BindError::PermissionDenied { address, source },
            _ => BindError::Io { address, source },
        }
    }
}

/// A bound listening socket, exclusively owned by one server instance.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind to `host:port`. Port 0 picks an ephemeral port.
    pub async fn bind(host: &str, port: u16) -> Result<Self, BindError> {
        let address = format!("{}:{}", host, port);
        let addr = lookup_host(address.as_str())
            .await
            .map_err(|e| BindError::InvalidAddress {
                address: address.clone(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| BindError::InvalidAddress {
                address: address.clone(),
                reason: "no addresses resolved".to_string(),
            })?;

        let inner = TcpListener::bind(addr)
            .await
            .map_err(|e| BindError::from_io(addr, e))?;

        let local_addr = inner
            .local_addr()
            .map_err(|e| BindError::from_io(addr, e))?;

        tracing::info!(address = %local_addr, "Listener bound");

        Ok(Self { inner, local_addr })
    }

    /// Accept the next TCP connection.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer_addr) = self.inner.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::trace!(peer_addr = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }
        tracing::trace!(peer_addr = %peer_addr, "Connection accepted");
        Ok((stream, peer_addr))
    }

    /// The resolved bind address (useful when bound to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
