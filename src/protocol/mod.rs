//! Wire protocols served at the end of the handler chain.

pub mod time;

pub use time::{rfc868_epoch, Clock, SystemClock, TimeHandler};
