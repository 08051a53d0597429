//! # Built-in subscribers
//!
//! - [`LogWriter`]: forwards events to `tracing` with structured fields.

#[cfg(feature = "logging")]
mod log;

#[cfg(feature = "logging")]
pub use log::LogWriter;
