//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Accept loop, dispatcher, handler stages
//!     → tracing events (peer_addr, connection_id fields)
//!     → logging.rs subscriber (stdout, pretty or JSON)
//! ```

pub mod logging;

pub use logging::init_logging;
