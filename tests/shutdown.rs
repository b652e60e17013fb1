//! Shutdown and drain behaviour against a live listener.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use time_server::protocol::{rfc868_epoch, TimeHandler};
use time_server::{Connection, Handler, HandlerChain, HandlerContext, ServerState};

mod common;

fn time_chain() -> HandlerChain {
    HandlerChain::standard(TimeHandler::new(rfc868_epoch()), common::default_options())
}

/// Blocks every connection until released, then delegates to the time handler.
struct Gate {
    entered: Notify,
    release: Notify,
    inner: TimeHandler,
}

struct Gated(Arc<Gate>);

#[async_trait]
impl Handler for Gated {
    async fn handle(&self, ctx: &HandlerContext, conn: &mut Connection) {
        self.0.entered.notify_one();
        self.0.release.notified().await;
        self.0.inner.handle(ctx, conn).await;
    }
}

/// Waits for cancellation and records that it was seen.
struct AwaitCancel {
    entered: Notify,
    observed: Notify,
}

struct Cancellable(Arc<AwaitCancel>);

#[async_trait]
impl Handler for Cancellable {
    async fn handle(&self, ctx: &HandlerContext, _conn: &mut Connection) {
        self.0.entered.notify_one();
        ctx.cancellation().cancelled().await;
        self.0.observed.notify_one();
    }
}

#[tokio::test]
async fn test_sequential_shutdown_runs_once() {
    let (server, _addr, serving) = common::start_server(time_chain()).await;

    let first = server.shutdown().await;
    let second = server.shutdown().await;

    assert!(first.is_ok());
    assert_eq!(first, second);
    assert_eq!(server.shutdown_runs(), 1);
    assert!(serving.await.unwrap().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_shutdown_runs_once() {
    let (server, _addr, serving) = common::start_server(time_chain()).await;

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let server = server.clone();
            tokio::spawn(async move { server.shutdown().await })
        })
        .collect();

    for caller in callers {
        assert!(caller.await.unwrap().is_ok());
    }

    assert_eq!(server.shutdown_runs(), 1);
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(serving.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_connection() {
    let gate = Arc::new(Gate {
        entered: Notify::new(),
        release: Notify::new(),
        inner: TimeHandler::new(rfc868_epoch()),
    });
    let chain = HandlerChain::standard(Gated(Arc::clone(&gate)), common::default_options());
    let (server, addr, serving) = common::start_server(chain).await;

    let client = tokio::spawn(common::fetch_raw(addr));
    gate.entered.notified().await;
    assert_eq!(server.active_connections(), 1);

    let shutdown = tokio::spawn({
        let server = server.clone();
        async move { server.shutdown().await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!shutdown.is_finished(), "shutdown must wait for the in-flight connection");
    assert_eq!(server.state(), ServerState::Draining);

    gate.release.notify_one();

    assert!(shutdown.await.unwrap().is_ok());
    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(server.active_connections(), 0);

    let received = client.await.unwrap().unwrap();
    assert_eq!(received.len(), 4);
    assert!(serving.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_handlers() {
    let handler = Arc::new(AwaitCancel {
        entered: Notify::new(),
        observed: Notify::new(),
    });
    let chain = HandlerChain::standard(Cancellable(Arc::clone(&handler)), common::default_options());
    let (server, addr, serving) = common::start_server(chain).await;

    let client = tokio::spawn(common::fetch_raw(addr));
    handler.entered.notified().await;

    let observed = handler.observed.notified();
    tokio::pin!(observed);
    observed.as_mut().enable();

    tokio::time::timeout(Duration::from_secs(5), server.shutdown())
        .await
        .expect("shutdown should finish once handlers observe cancellation")
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), observed)
        .await
        .expect("handler should observe cancellation");

    let received = client.await.unwrap().unwrap();
    assert!(received.is_empty());
    assert!(serving.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_no_connections_accepted_after_shutdown() {
    let (server, addr, serving) = common::start_server(time_chain()).await;

    common::assert_close_to_reference(common::fetch_time(addr).await);

    server.shutdown().await.unwrap();
    assert!(serving.await.unwrap().is_ok());

    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_abandoned_shutdown_call_still_completes() {
    let gate = Arc::new(Gate {
        entered: Notify::new(),
        release: Notify::new(),
        inner: TimeHandler::new(rfc868_epoch()),
    });
    let chain = HandlerChain::standard(Gated(Arc::clone(&gate)), common::default_options());
    let (server, addr, serving) = common::start_server(chain).await;

    let client = tokio::spawn(common::fetch_raw(addr));
    gate.entered.notified().await;

    // The deadline expires while the drain is still waiting.
    let first = tokio::time::timeout(Duration::from_millis(50), server.shutdown()).await;
    assert!(first.is_err());

    gate.release.notify_one();

    let second = tokio::time::timeout(Duration::from_secs(2), server.shutdown())
        .await
        .expect("later shutdown call should receive the recorded result");
    assert!(second.is_ok());
    assert_eq!(server.shutdown_runs(), 1);
    assert_eq!(server.state(), ServerState::Stopped);

    assert_eq!(client.await.unwrap().unwrap().len(), 4);
    assert!(serving.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_idle_server_reports_no_active_connections() {
    let (server, addr, serving) = common::start_server(time_chain()).await;
    assert_eq!(server.active_connections(), 0);

    common::assert_close_to_reference(common::fetch_time(addr).await);

    // The unit of work releases its guard just after the client sees EOF.
    tokio::time::timeout(Duration::from_secs(1), async {
        while server.active_connections() != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("serving server should settle at zero active connections");
    assert_eq!(server.state(), ServerState::Serving);

    server.shutdown().await.unwrap();
    assert!(serving.await.unwrap().is_ok());
}
