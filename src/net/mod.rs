//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, classify errors, close sentinel)
//!     → connection.rs (ID, socket options, close-once)
//!     → Hand off to the server's intake queue
//! ```
//!
//! # Design Decisions
//! - Closing the listener wakes a pending accept with `AcceptError::Closed`
//! - Each unit of work holds a tracker guard so shutdown can drain

pub mod connection;
pub mod listener;

pub use connection::{Connection, ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{AcceptError, Acceptor, CloseError, Listener, ListenerError};
