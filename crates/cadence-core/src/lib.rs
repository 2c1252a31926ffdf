//! `cadence-core`: configuration, shared error type and the clock abstraction
//! used by every other Cadence crate.

pub mod clock;
pub mod config;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CadenceConfig;
pub use error::{CadenceError, Result};
