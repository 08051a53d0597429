//! # Example: scheduled_jobs
//!
//! Runs one long-lived worker plus two scheduled jobs. Job entrypoints are this
//! binary re-executed in worker mode; they do not speak the IPC protocol
//! (`Readiness::Spawned`) and simply exit.
//!
//! ## Flow
//! ```text
//! boot "idle" ─► RUNNING ─► Scheduler starts
//!   ├─ "tick"  every 2s until t+7s ─► ProcessStarted ─► run ─► ProcessScheduled │ retired
//!   └─ "once"  at t+3s              ─► ProcessStarted ─► run ─► retired
//! t=9s: print scheduler and supervisor job views, shut down
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=procvisor=debug cargo run --example scheduled_jobs
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use procvisor::{
    IntervalTrigger, JobSpec, LogWriter, OnceTrigger, Readiness, ServiceContainer, Subscribe,
    Supervisor, SupervisorConfig, Worker, WorkerClient, WorkerSpec, serve,
};
use tracing_subscriber::EnvFilter;

struct Idle;

#[async_trait]
impl Worker for Idle {
    fn name(&self) -> &str {
        "idle"
    }

    async fn run(&self, _services: &ServiceContainer, _client: &WorkerClient) -> i32 {
        std::future::pending::<()>().await;
        0
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match std::env::var(procvisor::process::WORKER_ENV).as_deref() {
        Ok("idle") => std::process::exit(serve(Idle, ServiceContainer::new()).await),
        Ok(job) => {
            tracing::info!(job, "job run");
            return Ok(());
        }
        Err(_) => {}
    }

    let exe = std::env::current_exe()?.to_string_lossy().into_owned();
    let cfg = SupervisorConfig {
        grace: Duration::from_secs(2),
        ..SupervisorConfig::default()
    };
    let job_entry = |name: &str| {
        WorkerSpec::builder(name, exe.as_str())
            .readiness(Readiness::Spawned)
            .build(&cfg)
    };

    let now = chrono::Utc::now();
    let tick = JobSpec::new(
        "tick",
        job_entry("tick"),
        IntervalTrigger::every(Duration::from_secs(2)).until(now + chrono::Duration::seconds(7)),
    );
    let once = JobSpec::new(
        "once",
        job_entry("once"),
        OnceTrigger::at(now + chrono::Duration::seconds(3)),
    );

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let idle = WorkerSpec::with_defaults("idle", exe.as_str(), &cfg);
    let handle = Supervisor::builder(cfg.clone())
        .with_subscribers(subs)
        .with_jobs([tick, once])
        .build()
        .start(vec![idle])
        .await?;

    tokio::time::sleep(Duration::from_secs(9)).await;
    for job in handle.scheduled_jobs().await {
        println!(
            "[demo] job {} {:<4} trigger=({}) runs={} retired={}",
            job.id, job.name, job.trigger, job.runs, job.retired
        );
    }
    for job in handle.jobs().await {
        println!("[demo] announced job {}: runs={} next={:?}", job.id, job.runs, job.next_run_date);
    }

    match handle.shutdown().await {
        Ok(()) => println!("[demo] stopped"),
        Err(e) => println!("[demo] stopped: {e}"),
    }
    Ok(())
}
