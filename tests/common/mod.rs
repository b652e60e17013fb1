//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use time_server::handler::tune::{DisableDelay, DisableKeepAlive, SocketOption};
use time_server::protocol::time::{rfc868_epoch, seconds_since};
use time_server::{Handler, Listener, ServeError, Server};

/// Allowed gap between a response and the local reference clock.
pub const TOLERANCE_SECS: u32 = 5;

pub fn default_options() -> Vec<std::sync::Arc<dyn SocketOption>> {
    vec![
        std::sync::Arc::new(DisableKeepAlive),
        std::sync::Arc::new(DisableDelay),
    ]
}

/// Start a server on an ephemeral loopback port.
pub async fn start_server<H>(handler: H) -> (Server, SocketAddr, JoinHandle<Result<(), ServeError>>)
where
    H: Handler + 'static,
{
    let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let server = Server::new(listener, handler);
    let addr = server.local_addr();

    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve(CancellationToken::new()).await }
    });

    (server, addr, serving)
}

/// Connect, read until the server closes, return everything received.
pub async fn fetch_raw(addr: SocketAddr) -> io::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(addr).await?;
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut received))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "server did not close"))??;
    Ok(received)
}

/// Fetch and decode one timestamp.
pub async fn fetch_time(addr: SocketAddr) -> u32 {
    let received = fetch_raw(addr).await.unwrap();
    assert_eq!(received.len(), 4, "expected exactly 4 bytes, got {:?}", received);
    u32::from_be_bytes([received[0], received[1], received[2], received[3]])
}

pub fn reference_time() -> u32 {
    seconds_since(rfc868_epoch(), Utc::now())
}

pub fn assert_close_to_reference(actual: u32) {
    let expected = reference_time();
    let diff = expected.abs_diff(actual);
    assert!(
        diff <= TOLERANCE_SECS,
        "actual time {} differs from expected {} too significantly: {}",
        actual,
        expected,
        diff
    );
}
