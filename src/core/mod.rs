//! Runtime core: worker pool orchestration and lifecycle.
//!
//! The public API of this module is [`Supervisor`] (built with
//! [`SupervisorBuilder`]) and the [`SupervisorHandle`] it returns once booted.
//!
//! Internal modules:
//! - [`event_loop`]: the single task that owns worker state (spawn, exit, reload, shutdown);
//! - [`registry`]: per-worker slots and the pid index;
//! - [`supervisor`]: wiring, boot, and the control handle;
//! - [`shutdown`]: cross-platform termination signal handling.

mod builder;
mod config;
mod event_loop;
mod registry;
mod shutdown;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use config::SupervisorConfig;
pub use event_loop::ReloadOutcome;
pub use supervisor::{Supervisor, SupervisorHandle};
