//! RFC 868 time server library.
//!
//! Each accepted TCP connection receives the seconds elapsed since
//! 1900-01-01T00:00:00Z as a big-endian `u32`, then is closed.

pub mod config;
pub mod handler;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod resilience;
pub mod server;

pub use config::ServerConfig;
pub use handler::{Handler, HandlerChain, HandlerContext};
pub use net::{Connection, Listener};
pub use protocol::TimeHandler;
pub use server::{ServeError, Server, ServerState};
