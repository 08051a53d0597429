//! # Worker process contract.
//!
//! A workload implements [`Worker`]; its `main` hands it to [`serve`]:
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use procvisor::{ServiceContainer, ServiceError, Worker, WorkerClient, serve};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Worker for Echo {
//!     fn name(&self) -> &str { "echo" }
//!
//!     fn prepare(&self, services: &ServiceContainer) -> Result<(), ServiceError> {
//!         services.parameter::<u16>("port").map(|_| ())
//!     }
//!
//!     async fn run(&self, _services: &ServiceContainer, client: &WorkerClient) -> i32 {
//!         let _ = client.request_completed(1).await;
//!         0
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let code = serve(Echo, ServiceContainer::new()).await;
//!     std::process::exit(code);
//! }
//! ```
//!
//! ## Exit codes
//! - `run`'s return value on a normal run.
//! - `78` (`EX_CONFIG`) when `prepare` fails a service or parameter lookup.
//! - `1` when the supervisor cannot be reached for the handshake.

use async_trait::async_trait;

use super::client::WorkerClient;
use super::services::ServiceContainer;
use crate::error::{EXIT_CONFIG, ServiceError};

/// Exit code used when the readiness handshake fails.
const EXIT_UNREACHABLE: i32 = 1;

/// Workload run inside a supervised process.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Worker name, used when `PROCVISOR_WORKER` is not set.
    fn name(&self) -> &str;

    /// Identifiers of the supervising plugins that manage this worker kind.
    fn handled_by(&self) -> Vec<String> {
        Vec::new()
    }

    /// Resolves services and parameters before the worker announces readiness.
    fn prepare(&self, _services: &ServiceContainer) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Runs the workload and returns the process exit code.
    async fn run(&self, services: &ServiceContainer, client: &WorkerClient) -> i32;
}

/// Runs `worker` connected to the supervisor over stdio and returns the exit code.
pub async fn serve<W: Worker>(worker: W, services: ServiceContainer) -> i32 {
    let client = WorkerClient::over_stdio(worker.name());
    serve_with(&worker, &services, &client).await
}

/// Runs `worker` over an existing client: prepare, handshake, run, report exit.
pub async fn serve_with<W: Worker + ?Sized>(
    worker: &W,
    services: &ServiceContainer,
    client: &WorkerClient,
) -> i32 {
    if let Err(e) = worker.prepare(services) {
        tracing::error!(
            target: "procvisor::worker",
            worker = client.name(),
            error = %e,
            "configuration error"
        );
        return report_exit(client, EXIT_CONFIG).await;
    }

    if let Err(e) = client.handshake(worker.handled_by()).await {
        tracing::error!(
            target: "procvisor::worker",
            worker = client.name(),
            error = %e,
            "handshake failed"
        );
        client.finish().await;
        return EXIT_UNREACHABLE;
    }

    let code = worker.run(services, client).await;
    report_exit(client, code).await
}

async fn report_exit(client: &WorkerClient, code: i32) -> i32 {
    if let Err(e) = client.exiting(code).await {
        tracing::debug!(
            target: "procvisor::worker",
            worker = client.name(),
            error = %e,
            "exit not reported"
        );
    }
    client.finish().await;
    code
}
