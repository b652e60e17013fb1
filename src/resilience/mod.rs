//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Transient accept error:
//!     → backoff.rs (wait an exponentially growing, jittered delay)
//!     → retry accept
//! Successful accept:
//!     → backoff reset
//! ```

pub mod backoff;

pub use backoff::Backoff;
