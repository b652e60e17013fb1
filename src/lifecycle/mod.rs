//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     First caller → cancel → close listener → drain → record result
//!     Other callers → wait for recorded result
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT/SIGQUIT → binary calls Server::shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, report
//! - Shutdown side effects run once no matter how many callers

pub mod shutdown;
pub mod signals;

pub use shutdown::OneShot;
