//! # Example: supervise
//!
//! Boots two workers by re-executing this binary in worker mode, then exercises
//! reloads, crash restarts and graceful shutdown.
//!
//! ## Flow
//! ```text
//! supervisor (this process)
//!   ├─► spawn "web"   (current_exe, PROCVISOR_WORKER=web)   ─► handshake ─► RUNNING
//!   ├─► spawn "flaky" (current_exe, PROCVISOR_WORKER=flaky) ─► handshake ─► RUNNING
//!   │
//!   ├─ web reports a completed request every 500ms
//!   │     └─► Periodic(4s) ─► ReloadRequested ─► SIGTERM ─► exit 0 ─► new web
//!   ├─ flaky exits with 1 after 1.5s
//!   │     └─► BackoffScheduled ×2 ─► WorkerFailed (max_restarts = 2)
//!   ├─ t=3s: explicit request_reload("web")
//!   └─ t=10s: shutdown() ─► SIGTERM all ─► AllStoppedWithin
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example supervise
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use procvisor::{
    BackoffPolicy, LogWriter, OnException, Periodic, RestartPolicy, ServiceContainer, Subscribe,
    Supervisor, SupervisorConfig, Worker, WorkerClient, WorkerSpec, serve,
};
use tracing_subscriber::EnvFilter;

/// Serves until SIGTERM, reporting one request every 500ms.
struct Web;

#[async_trait]
impl Worker for Web {
    fn name(&self) -> &str {
        "web"
    }

    fn handled_by(&self) -> Vec<String> {
        vec!["http".into()]
    }

    async fn run(&self, _services: &ServiceContainer, client: &WorkerClient) -> i32 {
        let mut tick = tokio::time::interval(Duration::from_millis(500));
        let stop = terminated();
        tokio::pin!(stop);
        loop {
            tokio::select! {
                _ = &mut stop => return 0,
                _ = tick.tick() => {
                    let _ = client.request_completed(1).await;
                }
            }
        }
    }
}

/// Crashes shortly after becoming ready.
struct Flaky;

#[async_trait]
impl Worker for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn run(&self, _services: &ServiceContainer, client: &WorkerClient) -> i32 {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let _ = client.exception("lost connection to upstream").await;
        1
    }
}

#[cfg(unix)]
async fn terminated() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(_) => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn terminated() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_tracing() {
    // stdout carries IPC frames in worker mode; logs always go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    if let Ok(role) = std::env::var(procvisor::process::WORKER_ENV) {
        let code = match role.as_str() {
            "web" => serve(Web, ServiceContainer::new()).await,
            _ => serve(Flaky, ServiceContainer::new()).await,
        };
        std::process::exit(code);
    }

    let exe = std::env::current_exe()?.to_string_lossy().into_owned();
    let cfg = SupervisorConfig {
        grace: Duration::from_secs(5),
        backoff: BackoffPolicy {
            first: Duration::from_millis(200),
            ..BackoffPolicy::default()
        },
        ..SupervisorConfig::default()
    };

    let web = WorkerSpec::builder("web", exe.as_str())
        .strategy(Periodic::new(Duration::from_secs(4)))
        .reload_grace(Duration::from_secs(2))
        .build(&cfg);
    let flaky = WorkerSpec::builder("flaky", exe.as_str())
        .restart(RestartPolicy::OnFailure)
        .strategy(OnException)
        .max_restarts(2)
        .build(&cfg);

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let handle = Supervisor::builder(cfg)
        .with_subscribers(subs)
        .build()
        .start(vec![web, flaky])
        .await?;

    tokio::time::sleep(Duration::from_secs(3)).await;
    let outcome = handle.request_reload("web", None).await?;
    println!("[demo] explicit reload of web: {outcome:?}");

    tokio::time::sleep(Duration::from_secs(7)).await;
    for w in handle.workers().await {
        println!(
            "[demo] {:<6} status={:<9} pid={:?} restarts={} failed={}",
            w.name, w.status, w.pid, w.restart_count, w.failed
        );
    }

    handle.shutdown().await?;
    println!("[demo] all workers stopped");
    Ok(())
}
