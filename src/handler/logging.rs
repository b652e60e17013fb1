//! Start/end logging around each connection.

use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;

use crate::handler::{HandlerContext, Next, Stage};
use crate::net::{Connection, ConnectionId};

/// Logs a start event before delegating and an end event afterwards.
///
/// The end event is emitted from a drop guard, so it is also logged when
/// an inner stage panics.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectionLogger;

#[async_trait]
impl Stage for ConnectionLogger {
    fn name(&self) -> &'static str {
        "logger"
    }

    async fn handle(&self, ctx: &HandlerContext, conn: &mut Connection, next: Next<'_>) {
        let _end = EndOfServe {
            peer_addr: conn.peer_addr(),
            connection_id: conn.id(),
            started: Instant::now(),
        };

        tracing::info!(
            peer_addr = %conn.peer_addr(),
            connection_id = %conn.id(),
            "Start serving connection"
        );

        next.run(ctx, conn).await;
    }
}

struct EndOfServe {
    peer_addr: SocketAddr,
    connection_id: ConnectionId,
    started: Instant,
}

impl Drop for EndOfServe {
    fn drop(&mut self) {
        tracing::info!(
            peer_addr = %self.peer_addr,
            connection_id = %self.connection_id,
            elapsed_us = self.started.elapsed().as_micros() as u64,
            "End serving connection"
        );
    }
}
