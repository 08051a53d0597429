//! # Workers: what the supervisor runs, and how a worker process talks back.
//!
//! Supervisor side:
//! - [`WorkerSpec`] describes one supervised process (command, restart and reload policy).
//!
//! Worker side (inside the child process):
//! - [`Worker`] is the workload contract: `run(services) -> exit code`.
//! - [`serve`] connects to the supervisor over stdio, performs the readiness
//!   handshake, runs the worker and reports its exit.
//! - [`WorkerClient`] emits lifecycle events (requests served, connections, errors).
//! - [`ServiceContainer`] is the service/parameter lookup handed to the workload.

mod client;
mod contract;
mod services;
mod spec;

pub use client::WorkerClient;
pub use contract::{Worker, serve, serve_with};
pub use services::ServiceContainer;
pub use spec::{Readiness, WorkerSpec, WorkerSpecBuilder};
