//! # Process creation and control.
//!
//! The supervisor never touches `tokio::process` directly; it goes through the
//! [`Launcher`] seam so tests can substitute in-process fakes.
//!
//! ```text
//! Launcher::launch(spec) ──► Launched {
//!                               pid,
//!                               control  (terminate / kill),
//!                               exit     (resolves once with the exit code),
//!                               channel  (IPC byte streams, if the worker speaks the protocol)
//!                            }
//! ```

mod control;
mod launcher;
#[cfg(test)]
pub(crate) mod testing;

pub use control::{ChildControl, ProcessControl};
pub use launcher::{Channel, CommandLauncher, Launched, Launcher, WORKER_ENV};
