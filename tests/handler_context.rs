//! What a handler can see of the server that runs it.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use time_server::protocol::{rfc868_epoch, TimeHandler};
use time_server::{Connection, Handler, HandlerChain, HandlerContext, ServerState};

mod common;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Observed {
    local_addr: SocketAddr,
    state: ServerState,
    active: u64,
}

/// Records the server view, then answers with the time.
struct Inspect {
    seen: Arc<Mutex<Vec<Option<Observed>>>>,
    inner: TimeHandler,
}

#[async_trait]
impl Handler for Inspect {
    async fn handle(&self, ctx: &HandlerContext, conn: &mut Connection) {
        let observed = ctx.server().map(|server| Observed {
            local_addr: server.local_addr(),
            state: server.state(),
            active: server.active_connections(),
        });
        self.seen.lock().unwrap().push(observed);
        self.inner.handle(ctx, conn).await;
    }
}

#[tokio::test]
async fn test_handler_sees_owning_server() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = Inspect {
        seen: Arc::clone(&seen),
        inner: TimeHandler::new(rfc868_epoch()),
    };
    let chain = HandlerChain::standard(handler, common::default_options());
    let (server, addr, serving) = common::start_server(chain).await;

    common::assert_close_to_reference(common::fetch_time(addr).await);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![Some(Observed {
            local_addr: server.local_addr(),
            state: ServerState::Serving,
            active: 1,
        })]
    );

    server.shutdown().await.unwrap();
    assert!(serving.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_handler_context_not_cancelled_while_serving() {
    let cancelled = Arc::new(Mutex::new(Vec::new()));

    struct RecordCancelled(Arc<Mutex<Vec<bool>>>);

    #[async_trait]
    impl Handler for RecordCancelled {
        async fn handle(&self, ctx: &HandlerContext, _conn: &mut Connection) {
            self.0.lock().unwrap().push(ctx.is_cancelled());
        }
    }

    let chain = HandlerChain::standard(RecordCancelled(Arc::clone(&cancelled)), common::default_options());
    let (server, addr, serving) = common::start_server(chain).await;

    assert!(common::fetch_raw(addr).await.unwrap().is_empty());
    assert_eq!(*cancelled.lock().unwrap(), vec![false]);

    server.shutdown().await.unwrap();
    assert!(serving.await.unwrap().is_ok());
}
