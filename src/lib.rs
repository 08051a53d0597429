//! # procvisor
//!
//! **Procvisor** is a multi-process application supervisor for Rust.
//!
//! It boots a pool of long-running worker processes, watches them over a
//! cross-process message bus, recycles them gracefully when a reload strategy
//! says so, and drives scheduled jobs from triggers.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │  WorkerSpec  │   │  WorkerSpec  │   │   JobSpec    │
//!     │   ("web")    │   │  ("queue")   │   │ (cron/every) │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor event loop (one task, owns all worker state)          │
//! │  - Registry (slot per worker, pid index)                          │
//! │  - DelayQueue (respawn backoff, reload grace, strategy ticks)     │
//! │  - MessageBus handlers (handshake, lifecycle events)              │
//! │  - Bus (observability events) ──► SubscriberSet                   │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               ▼
//!   ┌──────────┐       ┌──────────┐       ┌──────────┐    ┌───────────┐
//!   │ process  │       │ process  │       │ process  │    │ Scheduler │
//!   │ (worker) │       │ (worker) │       │ (worker) │    │ (jobs)    │
//!   └────┬─────┘       └────┬─────┘       └────┬─────┘    └─────┬─────┘
//!        │ stdin/stdout     │                  │                │
//!        └──────── length-delimited JSON frames (MessageBus) ───┘
//!                  handshake, lifecycle events, job announcements
//! ```
//!
//! ### Worker lifecycle
//! ```text
//! SHUTDOWN ──launch──► STARTING ──handshake──► RUNNING ──reload──► STOPPING
//!    ▲                    │                       │                   │
//!    │                    └─ spawn failure ───────┤                   │
//!    └──── exit: restart budget / backoff ◄───────┴──── exit ◄────────┘
//!                                                 (replacement launched)
//! ```
//!
//! ## Features
//! | Area              | Description                                                      | Key types / traits                           |
//! |-------------------|------------------------------------------------------------------|----------------------------------------------|
//! | **Supervision**   | Boot, restart, reload and stop a pool of worker processes.       | [`Supervisor`], [`SupervisorHandle`]         |
//! | **Message bus**   | Typed request/reply and publish across process boundaries.       | [`MessageBus`], [`Message`], [`Pending`]     |
//! | **Reloading**     | Pure predicates deciding when a worker is recycled.              | [`ReloadStrategy`], [`AnyOf`], [`AllOf`]     |
//! | **Scheduling**    | Jobs driven by cron, interval or one-shot triggers.              | [`Scheduler`], [`Trigger`], [`JobSpec`]      |
//! | **Worker side**   | Handshake and lifecycle reporting from inside a worker.          | [`Worker`], [`serve`], [`WorkerClient`]      |
//! | **Subscriber API**| Hook into supervisor events (logging, metrics).                  | [`Subscribe`]                                |
//! | **Policies**      | Restart and backoff policies for crashed workers.                | [`RestartPolicy`], [`BackoffPolicy`]         |
//! | **Errors**        | Typed errors with stable labels.                                 | [`RuntimeError`], [`IpcError`]               |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] subscriber.
//!
//! ## Example
//! ```rust,no_run
//! use procvisor::{
//!     IntervalTrigger, JobSpec, Periodic, Readiness, Supervisor, SupervisorConfig, WorkerSpec,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = SupervisorConfig::default();
//!
//!     let web = WorkerSpec::builder("web", "/usr/local/bin/app-server")
//!         .strategy(Periodic::every_secs(3600))
//!         .build(&cfg);
//!
//!     let cleanup = JobSpec::new(
//!         "cleanup",
//!         WorkerSpec::builder("cleanup", "/usr/local/bin/cleanup")
//!             .readiness(Readiness::Spawned)
//!             .build(&cfg),
//!         IntervalTrigger::every(std::time::Duration::from_secs(300)),
//!     );
//!
//!     Supervisor::builder(cfg)
//!         .with_jobs([cleanup])
//!         .build()
//!         .run(vec![web])
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod core;
pub mod error;
pub mod events;
pub mod ipc;
pub mod policies;
pub mod process;
pub mod reload;
pub mod scheduler;
pub mod status;
pub mod subscribers;
pub mod worker;

// ---- Public re-exports ----

pub use clock::Clock;
pub use self::core::{
    ReloadOutcome, Supervisor, SupervisorBuilder, SupervisorConfig, SupervisorHandle,
};
pub use error::{EXIT_CONFIG, IpcError, RuntimeError, ServiceError, SpawnError};
pub use events::{Event, EventKind};
pub use ipc::{Handshake, HandshakeAck, LifecycleEvent, Message, MessageBus, Pending, PeerId};
pub use policies::{BackoffPolicy, JitterPolicy, RestartPolicy};
pub use process::{Channel, CommandLauncher, Launched, Launcher, ProcessControl};
pub use reload::{
    AllOf, Always, AnyOf, EachRequest, Never, OnBlocked, OnException, Periodic, ReloadEvent,
    ReloadStrategy,
};
pub use scheduler::{
    CronTrigger, IntervalTrigger, JobSpec, OnceTrigger, ScheduledJob, Scheduler, SchedulerHandle,
    Trigger,
};
pub use status::{JobSnapshot, ServerStatus, WorkerSnapshot, WorkerStatus};
pub use subscribers::{Subscribe, SubscriberSet};
pub use worker::{
    Readiness, ServiceContainer, Worker, WorkerClient, WorkerSpec, serve, serve_with,
};

// Built-in logger subscriber.
// Disable with: `--no-default-features`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
