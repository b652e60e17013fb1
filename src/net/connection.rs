//! Accepted connections and drain tracking.
//!
//! # Responsibilities
//! - Wrap an accepted TCP stream with its peer address and a unique ID
//! - Expose the socket options the tuner stage adjusts
//! - Close each connection exactly once
//! - Count live units of work so shutdown can wait for them

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use socket2::SockRef;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
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

/// An accepted client connection.
///
/// Owned by exactly one unit of work. The underlying descriptor is released
/// when the value is dropped; [`Connection::close`] performs the orderly
/// shutdown and only ever runs once.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    stream: TcpStream,
    closed: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self {
            id: ConnectionId::new(),
            peer_addr,
            stream,
            closed: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote endpoint identity, used as the logging key.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Enable or disable TCP keep-alive probes.
    pub fn set_keepalive(&self, enabled: bool) -> io::Result<()> {
        SockRef::from(&self.stream).set_keepalive(enabled)
    }

    pub fn keepalive(&self) -> io::Result<bool> {
        SockRef::from(&self.stream).keepalive()
    }

    /// Enable or disable `TCP_NODELAY` (Nagle's algorithm off when `true`).
    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.stream.set_nodelay(nodelay)
    }

    pub fn nodelay(&self) -> io::Result<bool> {
        self.stream.nodelay()
    }

    /// Whether [`Connection::close`] has already run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Flush and shut down the stream.
    ///
    /// Subsequent calls are no-ops returning `Ok(())`.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.shutdown().await
    }
}

/// Tracks live units of work for graceful shutdown.
///
/// Uses a watch channel so waiters are woken as soon as the count reaches zero.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<u64>>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { active: Arc::new(tx) }
    }

    /// Record a new unit of work. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active.send_modify(|count| *count += 1);
        ConnectionGuard {
            active: Arc::clone(&self.active),
        }
    }

    /// Get current live count.
    pub fn active_count(&self) -> u64 {
        *self.active.borrow()
    }

    /// Wait until every outstanding guard has been dropped.
    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a unit of work's lifetime.
/// Decrements the live count when dropped, including during a panic unwind.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<watch::Sender<u64>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.send_modify(|count| *count -= 1);
    }
}
