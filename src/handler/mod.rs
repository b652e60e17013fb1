//! Connection handlers and the decorator chain.
//!
//! # Data Flow
//! ```text
//! Dispatcher
//!     → close.rs    (close the connection on every exit path)
//!     → panic.rs    (contain panics from everything below)
//!     → logging.rs  (start/end events keyed by peer address)
//!     → tune.rs     (socket options, fatal or non-fatal)
//!     → endpoint    (protocol handler)
//! ```
//!
//! # Design Decisions
//! - Stages are an ordered list assembled once, not nested closures
//! - Each stage receives the rest of the chain as [`Next`]
//! - Per-connection failures never escape the unit of work

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::net::Connection;
use crate::server::ServerRef;

pub mod chain;
pub mod close;
pub mod logging;
pub mod panic;
pub mod tune;

pub use chain::{ChainBuilder, HandlerChain};
pub use close::CloseGuard;
pub use logging::ConnectionLogger;
pub use panic::PanicGuard;
pub use tune::{DisableDelay, DisableKeepAlive, Fatal, SocketOption, TuneError, Tuner};

/// Serves one connection.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext, conn: &mut Connection);
}

/// A behaviour wrapped around the rest of the chain.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable name used in logs and for inspecting chain order.
    fn name(&self) -> &'static str;

    async fn handle(&self, ctx: &HandlerContext, conn: &mut Connection, next: Next<'_>);
}

/// The remainder of a chain, handed to each stage.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    endpoint: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(stages: &'a [Arc<dyn Stage>], endpoint: &'a dyn Handler) -> Self {
        Self { stages, endpoint }
    }

    /// Run the remaining stages and then the endpoint.
    pub fn run<'b>(self, ctx: &'b HandlerContext, conn: &'b mut Connection) -> BoxFuture<'b, ()>
    where
        'a: 'b,
    {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.handle(ctx, conn, Next::new(rest, self.endpoint)),
            None => self.endpoint.handle(ctx, conn),
        }
    }
}

/// Per-connection context.
///
/// Carries a cancellation token derived from the serving server's token and
/// an explicit read-only reference to that server.
#[derive(Clone)]
pub struct HandlerContext {
    cancel: CancellationToken,
    server: Option<ServerRef>,
}

impl HandlerContext {
    pub fn new(cancel: CancellationToken, server: ServerRef) -> Self {
        Self {
            cancel,
            server: Some(server),
        }
    }

    /// A context not attached to any server, for driving handlers directly.
    pub fn detached(cancel: CancellationToken) -> Self {
        Self { cancel, server: None }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// True once the owning server has started shutting down.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn server(&self) -> Option<&ServerRef> {
        self.server.as_ref()
    }
}
