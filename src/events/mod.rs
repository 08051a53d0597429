//! Supervisor observability events: types and local broadcast bus.
//!
//! These events never cross a process boundary. They describe what the
//! supervisor loop and the scheduler did (spawned, restarted, reloaded, killed)
//! and feed [`Subscribe`](crate::Subscribe) implementations and tests.
//! Cross-process traffic goes through [`MessageBus`](crate::MessageBus).
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: the supervisor event loop, the scheduler, `SubscriberSet` workers.
//! - **Consumers**: the supervisor's subscriber listener and [`SupervisorHandle::events`](crate::SupervisorHandle::events).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
