//! Guaranteed connection close.

use std::panic::{self, AssertUnwindSafe};

use async_trait::async_trait;
use futures_util::FutureExt;

use crate::handler::{HandlerContext, Next, Stage};
use crate::net::Connection;

/// Closes the connection after the rest of the chain returns.
///
/// Also closes when an inner stage panics, then resumes the unwind so an
/// outer guard (or the task boundary) still sees it. Close failures are
/// logged only.
#[derive(Debug, Default, Clone, Copy)]
pub struct CloseGuard;

#[async_trait]
impl Stage for CloseGuard {
    fn name(&self) -> &'static str {
        "close-guard"
    }

    async fn handle(&self, ctx: &HandlerContext, conn: &mut Connection, next: Next<'_>) {
        let outcome = AssertUnwindSafe(next.run(ctx, conn)).catch_unwind().await;

        if let Err(err) = conn.close().await {
            tracing::warn!(
                peer_addr = %conn.peer_addr(),
                connection_id = %conn.id(),
                error = %err,
                "Failed to close connection"
            );
        }

        if let Err(payload) = outcome {
            panic::resume_unwind(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Handler, HandlerChain};
    use crate::net::connection::test_support::connection_pair;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::sync::CancellationToken;

    struct Hello;

    #[async_trait]
    impl Handler for Hello {
        async fn handle(&self, _ctx: &HandlerContext, conn: &mut Connection) {
            conn.stream_mut().write_all(b"hi").await.unwrap();
        }
    }

    struct Boom;

    #[async_trait]
    impl Handler for Boom {
        async fn handle(&self, _ctx: &HandlerContext, _conn: &mut Connection) {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn closes_after_normal_return() {
        let chain = HandlerChain::builder(Hello).stage(CloseGuard).build();
        let (mut conn, mut client) = connection_pair().await;
        let ctx = HandlerContext::detached(CancellationToken::new());

        chain.handle(&ctx, &mut conn).await;
        assert!(conn.is_closed());

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hi");
    }

    #[tokio::test]
    async fn closes_and_resumes_panic() {
        let chain = HandlerChain::builder(Boom).stage(CloseGuard).build();
        let (mut conn, mut client) = connection_pair().await;

        let task = tokio::spawn(async move {
            let ctx = HandlerContext::detached(CancellationToken::new());
            chain.handle(&ctx, &mut conn).await;
        });

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());

        let joined = task.await;
        assert!(joined.unwrap_err().is_panic());
    }
}
