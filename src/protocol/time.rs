//! RFC 868 time protocol handler.
//!
//! The response is the number of whole seconds since the epoch as a
//! big-endian `u32`. The value wraps modulo 2^32 (first in 2036 for the
//! 1900 epoch).

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::io::AsyncWriteExt;

use crate::handler::{Handler, HandlerContext};
use crate::net::Connection;

/// Seconds between 1900-01-01T00:00:00Z and the Unix epoch.
pub const RFC868_UNIX_OFFSET_SECS: i64 = 2_208_988_800;

/// Size of every response in bytes.
pub const RESPONSE_LEN: usize = 4;

/// 1900-01-01T00:00:00Z.
pub fn rfc868_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH - TimeDelta::seconds(RFC868_UNIX_OFFSET_SECS)
}

/// Whole seconds from `epoch` to `now`, wrapped to 32 bits.
pub fn seconds_since(epoch: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    (now - epoch).num_seconds() as u32
}

/// Wire encoding of a timestamp.
pub fn encode(seconds: u32) -> [u8; RESPONSE_LEN] {
    seconds.to_be_bytes()
}

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The host's UTC clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Writes the elapsed seconds since a fixed epoch.
pub struct TimeHandler {
    epoch: DateTime<Utc>,
    clock: Arc<dyn Clock>,
    write_timeout: Option<Duration>,
}

impl TimeHandler {
    pub fn new(epoch: DateTime<Utc>) -> Self {
        Self::with_clock(epoch, Arc::new(SystemClock))
    }

    pub fn with_clock(epoch: DateTime<Utc>, clock: Arc<dyn Clock>) -> Self {
        Self {
            epoch,
            clock,
            write_timeout: None,
        }
    }

    /// Bound the response write. `None` lets a slow client block indefinitely.
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    async fn respond(&self, conn: &mut Connection, frame: &[u8]) -> io::Result<()> {
        let write = conn.stream_mut().write_all(frame);
        match self.write_timeout {
            Some(limit) => tokio::time::timeout(limit, write).await.unwrap_or_else(|_| {
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "write deadline exceeded",
                ))
            }),
            None => write.await,
        }
    }
}

#[async_trait]
impl Handler for TimeHandler {
    async fn handle(&self, _ctx: &HandlerContext, conn: &mut Connection) {
        let seconds = seconds_since(self.epoch, self.clock.now());

        // No retry: the client is expected to reconnect.
        if let Err(err) = self.respond(conn, &encode(seconds)).await {
            tracing::warn!(
                peer_addr = %conn.peer_addr(),
                connection_id = %conn.id(),
                error = %err,
                "Failed to send response"
            );
            return;
        }

        tracing::debug!(
            peer_addr = %conn.peer_addr(),
            connection_id = %conn.id(),
            seconds,
            "Response sent"
        );
    }
}
