//! Accept loop, dispatch and graceful shutdown.
//!
//! # Data Flow
//! ```text
//! serve(parent token)
//!     → accept loop (Acceptor)
//!     → bounded intake queue
//!     → dispatcher.rs (one task per connection)
//!     → handler chain
//!
//! shutdown()
//!     → cancel serve token
//!     → close listener (accept loop returns Ok)
//!     → wait for the drain barrier
//! ```
//!
//! # States
//! ```text
//! Created → Serving → Draining → Stopped
//! ```
//! `shutdown` may run from any state; `serve` runs once per server.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::handler::Handler;
use crate::lifecycle::OneShot;
use crate::net::{AcceptError, Acceptor, CloseError, Connection, ConnectionTracker};
use crate::resilience::Backoff;

mod dispatcher;

use dispatcher::Dispatcher;

/// Default capacity of the intake queue.
pub const DEFAULT_INTAKE_CAPACITY: usize = 1024;

const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Error returned by [`Server::serve`].
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("server is already serving")]
    AlreadyServing,

    /// The listener failed in a way that stops the server.
    #[error("abort listening: {0}")]
    Accept(#[source] io::Error),

    #[error("dispatcher stopped unexpectedly")]
    DispatcherStopped,
}

/// Lifecycle state of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    /// Constructed, not serving.
    Created = 0,
    /// Accept loop active.
    Serving = 1,
    /// Shutdown requested; listener closed, live work finishing.
    Draining = 2,
    /// Terminal.
    Stopped = 3,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Created,
            1 => ServerState::Serving,
            2 => ServerState::Draining,
            _ => ServerState::Stopped,
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerState::Created => "created",
            ServerState::Serving => "serving",
            ServerState::Draining => "draining",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

struct Inner {
    acceptor: Arc<dyn Acceptor>,
    handler: Arc<dyn Handler>,
    intake_capacity: usize,
    /// Live units of work.
    tracker: ConnectionTracker,
    /// Running dispatchers; each still holds connections it has not spawned.
    dispatching: ConnectionTracker,
    state: AtomicU8,
    serving: AtomicBool,
    /// Token derived by `serve`; cancelled by `shutdown`.
    cancel: Mutex<Option<CancellationToken>>,
    shutdown: OneShot<Result<(), CloseError>>,
    shutdown_runs: AtomicUsize,
}

impl Inner {
    fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ServerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn cancel_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A TCP server running one handler chain per accepted connection.
///
/// Cloning is cheap; clones share the same listener and lifecycle.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    pub fn new<A, H>(acceptor: A, handler: H) -> Self
    where
        A: Acceptor + 'static,
        H: Handler + 'static,
    {
        Self::builder(acceptor, handler).build()
    }

    pub fn builder<A, H>(acceptor: A, handler: H) -> ServerBuilder
    where
        A: Acceptor + 'static,
        H: Handler + 'static,
    {
        ServerBuilder {
            acceptor: Arc::new(acceptor),
            handler: Arc::new(handler),
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.acceptor.local_addr()
    }

    pub fn state(&self) -> ServerState {
        self.inner.state()
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> u64 {
        self.inner.tracker.active_count()
    }

    /// How many times the shutdown body has executed (0 or 1).
    pub fn shutdown_runs(&self) -> usize {
        self.inner.shutdown_runs.load(Ordering::SeqCst)
    }

    /// Accept connections until the listener is closed.
    ///
    /// Returns `Ok(())` when [`Server::shutdown`] closed the listener. A fatal
    /// accept error triggers shutdown and is returned. `parent` is the root of
    /// the cancellation tokens handed to handlers.
    pub async fn serve(&self, parent: CancellationToken) -> Result<(), ServeError> {
        if self.inner.serving.swap(true, Ordering::SeqCst) {
            return Err(ServeError::AlreadyServing);
        }

        let cancel = parent.child_token();
        *self.inner.cancel_slot() = Some(cancel.clone());
        // Shutdown may have started before the token was stored.
        if self.inner.shutdown.has_started() {
            cancel.cancel();
        }

        let _ = self.inner.state.compare_exchange(
            ServerState::Created as u8,
            ServerState::Serving as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        let (intake_tx, intake_rx) = mpsc::channel(self.inner.intake_capacity);
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.inner.handler),
            self.inner.tracker.clone(),
            ServerRef::new(self.clone()),
            cancel,
        );
        tokio::spawn(dispatcher.run(intake_rx, self.inner.dispatching.track()));

        tracing::info!(
            address = %self.local_addr(),
            intake_capacity = self.inner.intake_capacity,
            "Accepting connections"
        );

        // The sender is dropped when the loop returns, letting the dispatcher drain.
        let result = self.accept_loop(intake_tx).await;

        match &result {
            Ok(()) => {
                tracing::info!(address = %self.local_addr(), "Accept loop stopped, listener closed");
            }
            Err(err) => {
                tracing::error!(address = %self.local_addr(), error = %err, "Abort listening");
                if let Err(close_err) = self.shutdown().await {
                    tracing::warn!(error = %close_err, "Shutdown after accept failure reported an error");
                }
            }
        }

        result
    }

    async fn accept_loop(&self, intake: mpsc::Sender<Connection>) -> Result<(), ServeError> {
        let mut backoff = Backoff::new(ACCEPT_BACKOFF_BASE, ACCEPT_BACKOFF_MAX);

        loop {
            match self.inner.acceptor.accept().await {
                Ok((stream, peer_addr)) => {
                    backoff.reset();
                    let conn = Connection::new(stream, peer_addr);

                    tracing::debug!(
                        peer_addr = %peer_addr,
                        connection_id = %conn.id(),
                        "Connection accepted"
                    );

                    // Blocks while the queue is full.
                    if intake.send(conn).await.is_err() {
                        return Err(ServeError::DispatcherStopped);
                    }
                }
                Err(AcceptError::Closed) => return Ok(()),
                Err(AcceptError::Transient(err)) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "Temporary accept error"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(AcceptError::Fatal(err)) => return Err(ServeError::Accept(err)),
            }
        }
    }

    /// Stop accepting, wait for in-flight connections, release the listener.
    ///
    /// The first call starts the work on its own task; every call, including
    /// one whose future is dropped early, gets the same recorded result.
    /// Must not be awaited from inside a handler, since the drain waits for
    /// that handler too.
    pub async fn shutdown(&self) -> Result<(), CloseError> {
        let server = self.clone();
        self.inner.shutdown.run(async move { server.drain().await }).await
    }

    async fn drain(&self) -> Result<(), CloseError> {
        let inner = &self.inner;

        inner.shutdown_runs.fetch_add(1, Ordering::SeqCst);
        inner.set_state(ServerState::Draining);
        tracing::info!(address = %self.local_addr(), "Shutting down");

        let cancel = inner.cancel_slot().clone();
        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        let closed = inner.acceptor.close();

        // Once the dispatcher is gone no new units of work can appear.
        inner.dispatching.wait_idle().await;

        tracing::debug!(
            active = inner.tracker.active_count(),
            "Waiting for in-flight connections"
        );
        inner.tracker.wait_idle().await;

        inner.set_state(ServerState::Stopped);
        tracing::info!(address = %self.local_addr(), "Server stopped");
        closed
    }
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    acceptor: Arc<dyn Acceptor>,
    handler: Arc<dyn Handler>,
    intake_capacity: usize,
}

impl ServerBuilder {
    /// Capacity of the intake queue. Values below 1 are raised to 1.
    pub fn intake_capacity(mut self, capacity: usize) -> Self {
        self.intake_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Server {
        Server {
            inner: Arc::new(Inner {
                acceptor: self.acceptor,
                handler: self.handler,
                intake_capacity: self.intake_capacity,
                tracker: ConnectionTracker::new(),
                dispatching: ConnectionTracker::new(),
                state: AtomicU8::new(ServerState::Created as u8),
                serving: AtomicBool::new(false),
                cancel: Mutex::new(None),
                shutdown: OneShot::new(),
                shutdown_runs: AtomicUsize::new(0),
            }),
        }
    }
}

/// Read-only view of the server handed to handlers.
#[derive(Clone)]
pub struct ServerRef {
    server: Server,
}

impl ServerRef {
    fn new(server: Server) -> Self {
        Self { server }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn state(&self) -> ServerState {
        self.server.state()
    }

    pub fn active_connections(&self) -> u64 {
        self.server.active_connections()
    }
}
