//! Intake queue consumer.
//!
//! # Responsibilities
//! - Pull accepted connections off the intake queue
//! - Spawn one task per connection running the full handler chain
//! - Hold a drain guard per task, and one for itself until the queue closes

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::handler::{Handler, HandlerContext};
use crate::net::{Connection, ConnectionGuard, ConnectionTracker};
use crate::server::ServerRef;

pub(crate) struct Dispatcher {
    handler: Arc<dyn Handler>,
    tracker: ConnectionTracker,
    server: ServerRef,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub(crate) fn new(
        handler: Arc<dyn Handler>,
        tracker: ConnectionTracker,
        server: ServerRef,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            handler,
            tracker,
            server,
            cancel,
        }
    }

    /// Dispatch until every sender is dropped and the queue is empty.
    ///
    /// `_running` keeps the drain barrier closed for connections that are
    /// queued but not yet spawned.
    pub(crate) async fn run(self, mut intake: mpsc::Receiver<Connection>, _running: ConnectionGuard) {
        while let Some(conn) = intake.recv().await {
            let unit = UnitOfWork {
                handler: Arc::clone(&self.handler),
                ctx: HandlerContext::new(self.cancel.child_token(), self.server.clone()),
                _guard: self.tracker.track(),
            };
            tokio::spawn(unit.run(conn));
        }

        tracing::debug!("Intake queue closed, dispatcher stopped");
    }
}

/// Everything one connection's task needs, passed in explicitly.
struct UnitOfWork {
    handler: Arc<dyn Handler>,
    ctx: HandlerContext,
    /// Released on completion or unwind.
    _guard: ConnectionGuard,
}

impl UnitOfWork {
    async fn run(self, mut conn: Connection) {
        self.handler.handle(&self.ctx, &mut conn).await;
    }
}
