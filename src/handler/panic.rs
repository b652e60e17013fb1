//! Panic containment for a single connection.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures_util::FutureExt;

use crate::handler::{HandlerContext, Next, Stage};
use crate::net::Connection;

/// Catches panics from the rest of the chain and logs them.
///
/// The unit of work then finishes normally, so one connection's failure
/// never reaches other connections or the server.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanicGuard;

#[async_trait]
impl Stage for PanicGuard {
    fn name(&self) -> &'static str {
        "panic-guard"
    }

    async fn handle(&self, ctx: &HandlerContext, conn: &mut Connection, next: Next<'_>) {
        if let Err(payload) = AssertUnwindSafe(next.run(ctx, conn)).catch_unwind().await {
            tracing::error!(
                peer_addr = %conn.peer_addr(),
                connection_id = %conn.id(),
                panic = panic_message(payload.as_ref()),
                "Connection handler panicked"
            );
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
