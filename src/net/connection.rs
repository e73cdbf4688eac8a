//! Connection registry and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Register every connection/session for forced termination at shutdown
//! - Signal when the last tracked connection has closed
//! - Track in-flight exchanges to enforce the idle keep-alive timeout

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{watch, Notify};

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough, only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What a registry entry stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Plain HTTP/1.1 connection.
    Plain,
    /// TLS HTTP/2 session carrying many streams.
    Session,
}

#[derive(Debug)]
struct Entry {
    kind: ConnectionKind,
    peer_addr: SocketAddr,
    kill: Arc<Notify>,
}

/// Live connections and sessions of one server instance.
///
/// Entries are added when a connection is accepted and removed when its
/// [`ConnectionGuard`] drops. Only the shutdown path forces entries closed.
#[derive(Debug)]
pub struct ConnectionRegistry {
    entries: DashMap<ConnectionId, Entry>,
    active: watch::Sender<usize>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            entries: DashMap::new(),
            active,
        }
    }

    /// Register a new connection. The returned guard deregisters on drop.
    pub fn register(self: &Arc<Self>, kind: ConnectionKind, peer_addr: SocketAddr) -> ConnectionGuard {
        let id = ConnectionId::new();
        let kill = Arc::new(Notify::new());
        self.entries.insert(
            id,
            Entry {
                kind,
                peer_addr,
                kill: Arc::clone(&kill),
            },
        );
        self.active.send_modify(|n| *n += 1);

        tracing::debug!(connection_id = %id, peer_addr = %peer_addr, kind = ?kind, "Connection registered");

        ConnectionGuard {
            registry: Arc::clone(self),
            id,
            kill,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of live entries of the given kind.
    pub fn count(&self, kind: ConnectionKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    /// Forcibly terminate every plain connection, idle or busy.
    pub fn close_all_connections(&self) -> usize {
        self.terminate(ConnectionKind::Plain)
    }

    /// Destroy every multiplexed session.
    pub fn destroy_all_sessions(&self) -> usize {
        self.terminate(ConnectionKind::Session)
    }

    /// Forcibly terminate everything still registered.
    pub fn terminate_all(&self) -> usize {
        self.close_all_connections() + self.destroy_all_sessions()
    }

    fn terminate(&self, kind: ConnectionKind) -> usize {
        let mut terminated = 0;
        for entry in self.entries.iter().filter(|e| e.kind == kind) {
            tracing::debug!(
                connection_id = %entry.key(),
                peer_addr = %entry.peer_addr,
                kind = ?kind,
                "Forcing connection closed"
            );
            // notify_one stores a permit, so a task that has not polled yet still sees it.
            entry.kill.notify_one();
            terminated += 1;
        }
        terminated
    }

    /// Wait until every registered connection has closed.
    pub async fn drained(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    fn remove(&self, id: ConnectionId) {
        if self.entries.remove(&id).is_some() {
            self.active.send_modify(|n| *n = n.saturating_sub(1));
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration of one connection; deregisters when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
    kill: Arc<Notify>,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Resolves once the registry forces this connection closed.
    pub async fn terminated(&self) {
        self.kill.notified().await
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// In-flight exchange accounting for one connection.
///
/// Each request holds an [`ActivityGuard`] until its response body has
/// been fully written; the connection counts as idle only when none are held.
#[derive(Debug, Default)]
pub struct Activity {
    in_flight: AtomicUsize,
    epoch: AtomicU64,
    changed: Notify,
}

impl Activity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark an exchange as started.
    pub fn begin(self: &Arc<Self>) -> ActivityGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.bump();
        ActivityGuard {
            activity: Arc::clone(self),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    /// Resolves once the connection has been idle for `timeout`.
    pub async fn idle_for(&self, timeout: Duration) {
        loop {
            let changed = self.changed.notified();
            if self.in_flight() > 0 {
                changed.await;
                continue;
            }

            let epoch = self.epoch.load(Ordering::SeqCst);
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    if self.in_flight() == 0 && self.epoch.load(Ordering::SeqCst) == epoch {
                        return;
                    }
                }
                _ = changed => {}
            }
        }
    }
}

/// Held for the duration of one exchange.
#[derive(Debug)]
pub struct ActivityGuard {
    activity: Arc<Activity>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.activity.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.activity.bump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn registry_counts_by_kind() {
        let registry = Arc::new(ConnectionRegistry::new());
        assert!(registry.is_empty());

        let plain = registry.register(ConnectionKind::Plain, peer());
        let session = registry.register(ConnectionKind::Session, peer());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.count(ConnectionKind::Plain), 1);
        assert_eq!(registry.count(ConnectionKind::Session), 1);

        drop(plain);
        assert_eq!(registry.len(), 1);
        drop(session);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn terminate_reaches_only_the_requested_kind() {
        let registry = Arc::new(ConnectionRegistry::new());
        let plain = registry.register(ConnectionKind::Plain, peer());
        let session = registry.register(ConnectionKind::Session, peer());

        assert_eq!(registry.destroy_all_sessions(), 1);

        tokio::time::timeout(Duration::from_secs(1), session.terminated())
            .await
            .expect("session should be told to close");

        let plain_signalled =
            tokio::time::timeout(Duration::from_millis(50), plain.terminated()).await;
        assert!(plain_signalled.is_err());
    }

    #[tokio::test]
    async fn drained_resolves_when_last_guard_drops() {
        let registry = Arc::new(ConnectionRegistry::new());
        let guard = registry.register(ConnectionKind::Plain, peer());

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.drained().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_waits_for_in_flight_exchanges() {
        let activity = Activity::new();
        let exchange = activity.begin();

        let idle = {
            let activity = Arc::clone(&activity);
            tokio::spawn(async move { activity.idle_for(Duration::from_millis(100)).await })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!idle.is_finished());

        drop(exchange);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(idle.is_finished());
    }
}
