//! Per-connection socket tuning.
//!
//! # Responsibilities
//! - Apply socket options in list order before the protocol handler runs
//! - Continue past non-fatal option failures
//! - Abort the connection's chain on a fatal option failure
//!
//! # Design Decisions
//! - Options are synchronous: setting a socket option is a single syscall
//! - Whether a failure is fatal is decided by the option, not the tuner

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ConnectionConfig;
use crate::handler::{HandlerContext, Next, Stage};
use crate::net::Connection;

/// A socket option failed to apply.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct TuneError {
    fatal: bool,
    #[source]
    source: io::Error,
}

impl TuneError {
    /// Logged; the chain continues with the next option.
    pub fn non_fatal(source: io::Error) -> Self {
        Self { fatal: false, source }
    }

    /// Logged; the connection is closed without running the protocol handler.
    pub fn fatal(source: io::Error) -> Self {
        Self { fatal: true, source }
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    pub fn into_source(self) -> io::Error {
        self.source
    }
}

/// A named, independently failable tuning step.
pub trait SocketOption: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, ctx: &HandlerContext, conn: &Connection) -> Result<(), TuneError>;
}

/// Turns off TCP keep-alive probes.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisableKeepAlive;

impl SocketOption for DisableKeepAlive {
    fn name(&self) -> &str {
        "disable-keepalive"
    }

    fn apply(&self, _ctx: &HandlerContext, conn: &Connection) -> Result<(), TuneError> {
        conn.set_keepalive(false).map_err(TuneError::non_fatal)
    }
}

/// Sets `TCP_NODELAY` so the response is not held back by Nagle's algorithm.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisableDelay;

impl SocketOption for DisableDelay {
    fn name(&self) -> &str {
        "disable-delay"
    }

    fn apply(&self, _ctx: &HandlerContext, conn: &Connection) -> Result<(), TuneError> {
        conn.set_nodelay(true).map_err(TuneError::non_fatal)
    }
}

/// Upgrades every failure of the wrapped option to fatal.
#[derive(Debug, Clone, Copy)]
pub struct Fatal<O>(pub O);

impl<O: SocketOption> SocketOption for Fatal<O> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn apply(&self, ctx: &HandlerContext, conn: &Connection) -> Result<(), TuneError> {
        self.0
            .apply(ctx, conn)
            .map_err(|err| TuneError::fatal(err.into_source()))
    }
}

/// An option backed by a closure.
pub struct FnOption<F> {
    name: String,
    f: F,
}

/// Build a [`SocketOption`] from a closure.
pub fn option_fn<F>(name: impl Into<String>, f: F) -> FnOption<F>
where
    F: Fn(&HandlerContext, &Connection) -> Result<(), TuneError> + Send + Sync,
{
    FnOption {
        name: name.into(),
        f,
    }
}

impl<F> SocketOption for FnOption<F>
where
    F: Fn(&HandlerContext, &Connection) -> Result<(), TuneError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, ctx: &HandlerContext, conn: &Connection) -> Result<(), TuneError> {
        (self.f)(ctx, conn)
    }
}

/// The options a [`ConnectionConfig`] asks for, in application order.
pub fn options_from_config(config: &ConnectionConfig) -> Vec<Arc<dyn SocketOption>> {
    let mut options: Vec<Arc<dyn SocketOption>> = Vec::new();

    if config.disable_keepalive {
        if config.fatal_tuning_errors {
            options.push(Arc::new(Fatal(DisableKeepAlive)));
        } else {
            options.push(Arc::new(DisableKeepAlive));
        }
    }

    if config.disable_delay {
        if config.fatal_tuning_errors {
            options.push(Arc::new(Fatal(DisableDelay)));
        } else {
            options.push(Arc::new(DisableDelay));
        }
    }

    options
}

/// Applies socket options, then runs the rest of the chain.
pub struct Tuner {
    options: Vec<Arc<dyn SocketOption>>,
}

impl Tuner {
    pub fn new(options: Vec<Arc<dyn SocketOption>>) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Stage for Tuner {
    fn name(&self) -> &'static str {
        "tuner"
    }

    async fn handle(&self, ctx: &HandlerContext, conn: &mut Connection, next: Next<'_>) {
        for (index, option) in self.options.iter().enumerate() {
            let Err(err) = option.apply(ctx, conn) else {
                continue;
            };

            tracing::warn!(
                peer_addr = %conn.peer_addr(),
                connection_id = %conn.id(),
                option = option.name(),
                position = index + 1,
                fatal = err.is_fatal(),
                error = %err,
                "Socket option failed"
            );

            if err.is_fatal() {
                tracing::error!(
                    peer_addr = %conn.peer_addr(),
                    connection_id = %conn.id(),
                    "Socket option failure is fatal, connection handling terminated"
                );
                return;
            }
        }

        next.run(ctx, conn).await;
    }
}
