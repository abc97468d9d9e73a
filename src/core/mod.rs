//! Core engine types and utilities

pub mod types;
pub mod error;
pub mod logging;
pub mod time;
pub mod config;

pub use types::*;
pub use error::Error;
pub use config::StreamingConfig;
pub use time::{Clock, ManualClock, SteppingClock, SystemClock};
