//! TCP listener with an explicit close sentinel.
//!
//! # Responsibilities
//! - Bind to the configured address or adopt an already-bound socket
//! - Accept incoming TCP connections
//! - Classify accept errors as transient or fatal
//! - Report a deliberate close as [`AcceptError::Closed`], never by error text

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// `ENFILE` and `EMFILE` share these values on Linux, macOS and the BSDs.
#[cfg(unix)]
const DESCRIPTOR_EXHAUSTION: [i32; 2] = [23, 24];

/// Error type for binding a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// The socket has no readable local address.
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] io::Error),
}

/// Error type for a single accept call.
#[derive(Debug, Error)]
pub enum AcceptError {
    /// The listener was closed by its owner. Not a failure.
    #[error("listener closed")]
    Closed,
    /// Recoverable network condition; the accept loop should retry.
    #[error("transient accept error: {0}")]
    Transient(#[source] io::Error),
    /// The listener can no longer accept connections.
    #[error("accept failed: {0}")]
    Fatal(#[source] io::Error),
}

impl AcceptError {
    /// Sort an OS accept error into [`AcceptError::Transient`] or [`AcceptError::Fatal`].
    pub fn classify(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::OutOfMemory => AcceptError::Transient(err),
            _ if is_descriptor_exhaustion(&err) => AcceptError::Transient(err),
            _ => AcceptError::Fatal(err),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, AcceptError::Closed)
    }
}

#[cfg(unix)]
fn is_descriptor_exhaustion(err: &io::Error) -> bool {
    err.raw_os_error()
        .is_some_and(|code| DESCRIPTOR_EXHAUSTION.contains(&code))
}

#[cfg(not(unix))]
fn is_descriptor_exhaustion(_err: &io::Error) -> bool {
    false
}

/// Error type for closing a listener.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloseError {
    #[error("listener already closed")]
    AlreadyClosed,
}

/// Source of inbound connections for a [`crate::server::Server`].
///
/// [`Listener`] is the production implementation; tests substitute scripted
/// acceptors to drive specific error paths.
#[async_trait]
pub trait Acceptor: Send + Sync {
    /// Wait for the next connection.
    ///
    /// Must return [`AcceptError::Closed`] once [`Acceptor::close`] has run,
    /// including for a call that was already pending.
    async fn accept(&self) -> Result<(TcpStream, SocketAddr), AcceptError>;

    /// Stop accepting and release the socket.
    fn close(&self) -> Result<(), CloseError>;

    fn local_addr(&self) -> SocketAddr;
}

/// A TCP listener that can be closed while another task is blocked in `accept`.
#[derive(Debug)]
pub struct Listener {
    /// `None` once closed. Pending accepts hold their own clone until woken.
    inner: Mutex<Option<Arc<TcpListener>>>,
    /// Wakes pending accepts when the listener is closed.
    closed: CancellationToken,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind to the given address.
    pub async fn bind(addr: SocketAddr) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;
        Self::from_tokio(listener)
    }

    /// Adopt an already-bound listening socket.
    pub fn from_tokio(listener: TcpListener) -> Result<Self, ListenerError> {
        let local_addr = listener.local_addr().map_err(ListenerError::LocalAddr)?;

        tracing::info!(address = %local_addr, "Listener bound");

        Ok(Self {
            inner: Mutex::new(Some(Arc::new(listener))),
            closed: CancellationToken::new(),
            local_addr,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn socket(&self) -> MutexGuard<'_, Option<Arc<TcpListener>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Acceptor for Listener {
    async fn accept(&self) -> Result<(TcpStream, SocketAddr), AcceptError> {
        let listener = self.socket().clone().ok_or(AcceptError::Closed)?;

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(AcceptError::Closed),
            result = listener.accept() => result.map_err(AcceptError::classify),
        }
    }

    fn close(&self) -> Result<(), CloseError> {
        let listener = self.socket().take().ok_or(CloseError::AlreadyClosed)?;
        self.closed.cancel();
        drop(listener);

        tracing::info!(address = %self.local_addr, "Listener closed");
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
