//! Transport server.
//!
//! # Responsibilities
//! - Validate the configuration and bind the listening socket
//! - Terminate TLS and negotiate HTTP/2 in secure-multiplexed mode
//! - Serve HTTP/1.1 with an idle keep-alive timeout in plain mode
//! - Register every connection/session for forced close at shutdown
//! - Wire up middleware (tracing, CORS) around the request handler

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::DefaultBodyLimit;
use axum::{middleware, Router};
use hyper::body::{Body as HttpBody, Frame, Incoming, SizeHint};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::config::validation::validate;
use crate::config::{ServerConfig, TransportMode, DEFAULT_SHUTDOWN_TIMEOUT_MS};
use crate::http::cors::cors_middleware;
use crate::http::handler::{dispatch, SharedHandler, StreamEcho};
use crate::lifecycle::shutdown;
use crate::net::connection::{Activity, ActivityGuard, ConnectionGuard};
use crate::net::tls::{build_acceptor, generate_self_signed};
use crate::net::{BindError, ConnectionKind, ConnectionRegistry, Listener};

/// Upper bound for a client to complete the TLS handshake.
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Back-off after a failed `accept` (e.g. file descriptor exhaustion).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// HTTP test server speaking plain HTTP/1.1 or TLS HTTP/2.
pub struct TransportServer {
    router: Router,
    config: ServerConfig,
}

impl TransportServer {
    /// Prepare a server; nothing is bound until [`Self::bind`].
    pub fn new(config: ServerConfig) -> Self {
        let handler: SharedHandler = match &config.handler {
            Some(handler) => Arc::clone(handler),
            None => Arc::new(StreamEcho::new(config.use_buffering, config.rate)),
        };
        let router = Self::build_router(handler);
        Self { router, config }
    }

    /// Validate, bind and start serving `config`.
    pub async fn start(config: ServerConfig) -> Result<ServerHandle, BindError> {
        Self::new(config).bind().await
    }

    /// Start serving `handler` with default settings.
    pub async fn start_with_handler<H>(handler: H) -> Result<ServerHandle, BindError>
    where
        H: crate::http::handler::RequestHandler,
    {
        Self::start(ServerConfig::with_handler(handler)).await
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(handler: SharedHandler) -> Router {
        Router::new()
            .fallback(dispatch)
            .with_state(handler)
            // Uploads are unbounded; handlers that buffer choose their own limit.
            .layer(DefaultBodyLimit::disable())
            .layer(middleware::from_fn(cors_middleware))
            .layer(TraceLayer::new_for_http())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the listening socket and spawn the accept loop.
    pub async fn bind(self) -> Result<ServerHandle, BindError> {
        let Self { router, config } = self;
        validate(&config).map_err(BindError::InvalidConfig)?;

        let tls = match config.mode {
            TransportMode::Plain => None,
            TransportMode::SecureMultiplexed => {
                let material = match &config.tls {
                    Some(material) => material.clone(),
                    None => generate_self_signed().map_err(|e| BindError::Tls(e.to_string()))?,
                };
                Some(build_acceptor(&material).await?)
            }
        };

        let listener = Listener::bind(&config.host, config.port).await?;
        let address = listener.local_addr();

        let registry = Arc::new(ConnectionRegistry::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ctx = Arc::new(ConnectionContext {
            router,
            tls,
            mode: config.mode,
            keep_alive: config.keep_alive_timeout(),
            registry: Arc::clone(&registry),
        });

        let accept_task = tokio::spawn(accept_loop(listener, ctx, shutdown_rx));

        tracing::info!(
            address = %address,
            mode = %config.mode,
            buffering = config.use_buffering,
            rate = ?config.rate,
            "Transport server started"
        );

        Ok(ServerHandle {
            address,
            mode: config.mode,
            registry,
            shutdown: shutdown_tx,
            accept_task,
        })
    }
}

/// A running server.
///
/// Pass it to [`crate::lifecycle::shutdown::stop`] (or call
/// [`ServerHandle::stop`]) to tear it down. Dropping the handle stops the
/// accept loop and lets open connections drain on their own.
#[derive(Debug)]
pub struct ServerHandle {
    pub(crate) address: SocketAddr,
    pub(crate) mode: TransportMode,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) accept_task: JoinHandle<()>,
}

impl ServerHandle {
    /// Resolved bind address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// Base URL, e.g. `http://localhost:4444`.
    pub fn url(&self) -> String {
        format!("{}://localhost:{}", self.mode.scheme(), self.port())
    }

    /// Live connections (plain) or sessions (secure-multiplexed).
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn active_connections(&self) -> usize {
        self.registry.len()
    }

    /// Stop with the default 10 second bound.
    pub async fn stop(self) {
        shutdown::stop(self, Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS)).await
    }

    pub async fn stop_with_timeout(self, timeout: Duration) {
        shutdown::stop(self, timeout).await
    }
}

/// Shared by every connection of one server.
struct ConnectionContext {
    router: Router,
    tls: Option<TlsAcceptor>,
    mode: TransportMode,
    keep_alive: Duration,
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionContext {
    fn kind(&self) -> ConnectionKind {
        match self.mode {
            TransportMode::Plain => ConnectionKind::Plain,
            TransportMode::SecureMultiplexed => ConnectionKind::Session,
        }
    }
}

async fn accept_loop(
    listener: Listener,
    ctx: Arc<ConnectionContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let address = listener.local_addr();

    loop {
        tokio::select! {
            // A send or a dropped sender both mean: stop accepting.
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let guard = ctx.registry.register(ctx.kind(), peer_addr);
                    tokio::spawn(serve_connection(
                        stream,
                        peer_addr,
                        guard,
                        Arc::clone(&ctx),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(address = %address, error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }

    tracing::info!(address = %address, "Listener closed");
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    guard: ConnectionGuard,
    ctx: Arc<ConnectionContext>,
    shutdown: watch::Receiver<bool>,
) {
    match &ctx.tls {
        None => {
            drive(TokioIo::new(stream), &guard, &ctx, shutdown, Some(ctx.keep_alive)).await;
        }
        Some(acceptor) => {
            let handshake = tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream));
            let tls_stream = tokio::select! {
                _ = guard.terminated() => {
                    tracing::debug!(connection_id = %guard.id(), "Session destroyed during handshake");
                    return;
                }
                result = handshake => match result {
                    Ok(Ok(tls_stream)) => tls_stream,
                    Ok(Err(e)) => {
                        tracing::debug!(connection_id = %guard.id(), peer_addr = %peer_addr, error = %e, "TLS handshake failed");
                        return;
                    }
                    Err(_) => {
                        tracing::debug!(connection_id = %guard.id(), peer_addr = %peer_addr, "TLS handshake timed out");
                        return;
                    }
                },
            };
            tracing::debug!(connection_id = %guard.id(), peer_addr = %peer_addr, "Session established");
            drive(TokioIo::new(tls_stream), &guard, &ctx, shutdown, None).await;
        }
    }
}

/// Serve HTTP on `io` until the peer leaves, the connection idles out,
/// the server drains, or the registry forces it closed.
async fn drive<I>(
    io: I,
    guard: &ConnectionGuard,
    ctx: &ConnectionContext,
    mut shutdown: watch::Receiver<bool>,
    keep_alive: Option<Duration>,
) where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let activity = Activity::new();
    let service = {
        let router = ctx.router.clone();
        let activity = Arc::clone(&activity);
        service_fn(move |request: hyper::Request<Incoming>| {
            let exchange = activity.begin();
            let router = router.clone();
            async move {
                let response = router.oneshot(request.map(Body::new)).await?;
                Ok::<_, Infallible>(response.map(|body| Body::new(TrackedBody::new(body, exchange))))
            }
        })
    };

    let builder = protocol_builder(ctx.mode);
    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(connection_id = %guard.id(), error = %e, "Connection ended with error");
                }
                break;
            }
            _ = guard.terminated() => {
                // Dropping the connection future closes the socket mid-flight.
                tracing::debug!(connection_id = %guard.id(), "Connection destroyed");
                break;
            }
            _ = idle(&activity, keep_alive), if !draining => {
                tracing::trace!(connection_id = %guard.id(), "Keep-alive timeout");
                conn.as_mut().graceful_shutdown();
                draining = true;
            }
            _ = shutdown.changed(), if !draining => {
                conn.as_mut().graceful_shutdown();
                draining = true;
            }
        }
    }
}

/// Plain mode speaks only HTTP/1.1; secure mode only HTTP/2.
fn protocol_builder(mode: TransportMode) -> auto::Builder<TokioExecutor> {
    let builder = auto::Builder::new(TokioExecutor::new());
    match mode {
        TransportMode::Plain => builder.http1_only(),
        TransportMode::SecureMultiplexed => builder.http2_only(),
    }
}

async fn idle(activity: &Activity, keep_alive: Option<Duration>) {
    match keep_alive {
        Some(timeout) => activity.idle_for(timeout).await,
        None => std::future::pending().await,
    }
}

/// Response body that keeps its exchange marked in-flight until dropped.
struct TrackedBody {
    inner: Body,
    _exchange: ActivityGuard,
}

impl TrackedBody {
    fn new(inner: Body, exchange: ActivityGuard) -> Self {
        Self {
            inner,
            _exchange: exchange,
        }
    }
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
