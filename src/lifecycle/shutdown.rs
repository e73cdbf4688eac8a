//! Bounded server shutdown.
//!
//! # Responsibilities
//! - Close plain connections / destroy secure sessions
//! - Stop the listener and wait for in-flight work to drain
//! - Give up after a timeout and force everything closed

use std::time::Duration;

use crate::config::{TransportMode, DEFAULT_SHUTDOWN_TIMEOUT_MS};
use crate::http::ServerHandle;

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS);

/// Stop `handle`, waiting at most `timeout` for a graceful close.
///
/// Completes in roughly `min(graceful close time, timeout)`. When it
/// returns, the port is free to bind again.
pub async fn stop(handle: ServerHandle, timeout: Duration) {
    let ServerHandle {
        address,
        mode,
        registry,
        shutdown,
        mut accept_task,
    } = handle;

    tracing::info!(address = %address, mode = %mode, "Stopping server");

    let closed = match mode {
        TransportMode::Plain => registry.close_all_connections(),
        TransportMode::SecureMultiplexed => registry.destroy_all_sessions(),
    };
    tracing::debug!(closed, "Closed open connections");

    // Stop accepting; connections that raced in drain gracefully.
    let _ = shutdown.send(true);

    let graceful = async {
        if let Err(e) = (&mut accept_task).await {
            tracing::warn!(error = %e, "Accept loop ended abnormally");
        }
        registry.drained().await;
    };

    match tokio::time::timeout(timeout, graceful).await {
        Ok(()) => tracing::info!(address = %address, "Server closed"),
        Err(_) => {
            tracing::warn!(
                address = %address,
                timeout_ms = timeout.as_millis() as u64,
                remaining = registry.len(),
                "Graceful close timed out, forcing shutdown"
            );
            if !accept_task.is_finished() {
                accept_task.abort();
                let _ = accept_task.await;
            }
            registry.terminate_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::http::TransportServer;

    #[tokio::test]
    async fn idle_server_stops_promptly_and_frees_the_port() {
        let handle = TransportServer::start(ServerConfig::default().port(0)).await.unwrap();
        let port = handle.port();

        let started = std::time::Instant::now();
        stop(handle, Duration::from_secs(5)).await;
        assert!(started.elapsed() < Duration::from_secs(1));

        let again = TransportServer::start(ServerConfig::default().port(port)).await.unwrap();
        again.stop().await;
    }
}
