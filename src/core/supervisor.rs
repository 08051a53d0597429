//! # Supervisor: boots the worker pool and hands out a control handle.
//!
//! The [`Supervisor`] wires the runtime together and then steps aside: all state
//! lives in the event loop task, all control goes through [`SupervisorHandle`].
//!
//! ## High-level architecture
//! ```text
//! Supervisor::start(Vec<WorkerSpec>)
//!   - validate specs (unique non-empty names, commands) and jobs
//!   - Bus + SubscriberSet, subscriber_listener(): Bus ─► SubscriberSet::emit
//!   - MessageBus handlers:
//!       Handshake      ─► Command::Handshake ─► loop marks worker RUNNING, replies ack
//!       LifecycleEvent ─► Command::Lifecycle ─► reload strategies / job tracking
//!   - ServerStatus captured once
//!   - spawn EventLoop::run()  ──► launches every worker
//!   - await boot: all RUNNING │ BootAborted │ Fatal
//!   - spawn Scheduler (child of the runtime token)
//!   └─► SupervisorHandle
//!
//! Supervisor::run(Vec<WorkerSpec>)
//!   start() then select! {
//!     OS signal        ─► handle.shutdown()  (SIGTERM all, wait grace, SIGKILL stragglers)
//!     handle.wait()    ─► loop finished on its own (fatal spawn failure)
//!   }
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use std::time::Duration;
//! use procvisor::{EachRequest, Readiness, Supervisor, SupervisorConfig, WorkerSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = SupervisorConfig::default();
//!     let web = WorkerSpec::builder("web", "/usr/local/bin/app-server")
//!         .args(["--port", "8080"])
//!         .strategy(EachRequest)
//!         .reload_grace(Duration::from_secs(5))
//!         .build(&cfg);
//!     let cron = WorkerSpec::builder("sidecar", "/usr/local/bin/sidecar")
//!         .readiness(Readiness::Spawned)
//!         .build(&cfg);
//!
//!     Supervisor::builder(cfg).build().run(vec![web, cron]).await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::builder::SupervisorBuilder;
use super::config::SupervisorConfig;
use super::event_loop::{Command, EventLoop, LoopParts, Outcome, ReloadOutcome, Target};
use super::registry::Registry;
use super::shutdown;
use crate::clock::Clock;
use crate::error::{IpcError, RuntimeError};
use crate::events::{Bus, Event};
use crate::ipc::{Handshake, HandshakeAck, LifecycleEvent, Message, MessageBus, Pending};
use crate::process::Launcher;
use crate::scheduler::{JobSpec, ScheduledJob, Scheduler, SchedulerHandle};
use crate::status::{JobSnapshot, ServerStatus, WorkerSnapshot};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::worker::WorkerSpec;

const TARGET: &str = "procvisor::supervisor";

/// Boots and supervises a pool of worker processes.
pub struct Supervisor {
    cfg: SupervisorConfig,
    launcher: Arc<dyn Launcher>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    jobs: Vec<JobSpec>,
    clock: Clock,
}

impl Supervisor {
    /// Starts building a supervisor.
    pub fn builder(cfg: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: SupervisorConfig,
        launcher: Arc<dyn Launcher>,
        subscribers: Vec<Arc<dyn Subscribe>>,
        jobs: Vec<JobSpec>,
        clock: Clock,
    ) -> Self {
        Self {
            cfg,
            launcher,
            subscribers,
            jobs,
            clock,
        }
    }

    /// Supervisor configuration.
    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    /// Boots `workers` and returns once every one of them is RUNNING.
    ///
    /// # Errors
    /// - [`RuntimeError::Configuration`] for invalid worker or job definitions
    ///   (nothing is spawned).
    /// - [`RuntimeError::BootAborted`] when a worker exits or misses the ready
    ///   deadline before becoming ready.
    /// - [`RuntimeError::Fatal`] when a worker cannot be spawned.
    ///
    /// On error every worker started so far has been stopped.
    pub async fn start(self, workers: Vec<WorkerSpec>) -> Result<SupervisorHandle, RuntimeError> {
        validate_workers(&workers)?;
        let Supervisor {
            cfg,
            launcher,
            subscribers,
            jobs,
            clock,
        } = self;

        let events = Bus::new(cfg.bus_capacity_clamped());
        let bus = MessageBus::with_max_frame_length(cfg.max_frame_length);
        let scheduler = Scheduler::new(bus.clone(), Arc::clone(&launcher))
            .with_events(events.clone())
            .with_clock(clock)
            .jobs(jobs);
        scheduler.validate()?;

        let runtime_token = CancellationToken::new();
        let subs = SubscriberSet::new(subscribers, events.clone());
        subscriber_listener(&events, subs, runtime_token.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        register_handlers(&bus, &tx);

        let status = Arc::new(ServerStatus::capture(
            cfg.start_file.as_deref(),
            clock.now(),
        ));
        tracing::info!(
            target: TARGET,
            event_loop = status.event_loop_kind(),
            start_file = %status.start_file_path().display(),
            "server status captured"
        );

        let (outcome_tx, outcome_rx) = watch::channel::<Outcome>(None);
        let (boot_tx, boot_rx) = oneshot::channel();
        let event_loop = EventLoop::new(LoopParts {
            cfg,
            registry: Registry::new(workers),
            launcher: Arc::clone(&launcher),
            bus: bus.clone(),
            events: events.clone(),
            tx: tx.clone(),
            rx,
            boot_reply: boot_tx,
            outcome: outcome_tx,
            runtime_token: runtime_token.clone(),
        });
        tokio::spawn(event_loop.run());

        boot_rx.await.map_err(|_| RuntimeError::Closed)??;

        let scheduler = scheduler.spawn(runtime_token.child_token())?;

        Ok(SupervisorHandle {
            tx,
            outcome: outcome_rx,
            events,
            bus,
            status,
            scheduler: Arc::new(scheduler),
        })
    }

    /// Boots `workers` and supervises them until an OS termination signal arrives,
    /// then shuts down gracefully.
    ///
    /// # Errors
    /// Boot errors as in [`start`](Self::start); [`RuntimeError::GraceExceeded`] when
    /// workers had to be killed on shutdown; [`RuntimeError::Fatal`] when a worker
    /// could no longer be spawned.
    pub async fn run(self, workers: Vec<WorkerSpec>) -> Result<(), RuntimeError> {
        let handle = self.start(workers).await?;
        tokio::select! {
            signal = shutdown::wait_for_shutdown_signal() => match signal {
                Ok(name) => {
                    tracing::info!(target: TARGET, signal = name, "termination signal received");
                    handle.shutdown().await
                }
                Err(e) => {
                    tracing::error!(
                        target: TARGET,
                        error = %e,
                        "cannot listen for termination signals"
                    );
                    handle.wait().await
                }
            },
            res = handle.wait() => res,
        }
    }
}

/// Control handle to a running supervisor. Cheap to clone.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Command>,
    outcome: watch::Receiver<Outcome>,
    events: Bus,
    bus: MessageBus,
    status: Arc<ServerStatus>,
    scheduler: Arc<SchedulerHandle>,
}

impl SupervisorHandle {
    /// Gracefully reloads the worker named `name`.
    ///
    /// `grace` overrides the worker's reload grace. Concurrent requests for the
    /// same worker coalesce into one replacement.
    pub async fn request_reload(
        &self,
        name: &str,
        grace: Option<Duration>,
    ) -> Result<ReloadOutcome, RuntimeError> {
        self.reload(Target::Name(name.to_string()), grace).await
    }

    /// Gracefully reloads the worker currently running as `pid`.
    pub async fn request_reload_pid(
        &self,
        pid: u32,
        grace: Option<Duration>,
    ) -> Result<ReloadOutcome, RuntimeError> {
        self.reload(Target::Pid(pid), grace).await
    }

    async fn reload(
        &self,
        target: Target,
        grace: Option<Duration>,
    ) -> Result<ReloadOutcome, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Reload {
                target,
                grace,
                reply,
            })
            .map_err(|_| RuntimeError::ShuttingDown)?;
        rx.await.map_err(|_| RuntimeError::ShuttingDown)?
    }

    /// Snapshot of every worker in definition order; empty once stopped.
    pub async fn workers(&self) -> Vec<WorkerSnapshot> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Workers(reply)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Snapshot of one worker.
    pub async fn worker(&self, name: &str) -> Option<WorkerSnapshot> {
        self.workers().await.into_iter().find(|w| w.name == name)
    }

    /// Job runs as announced to the supervisor over the message bus.
    pub async fn jobs(&self) -> Vec<JobSnapshot> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Jobs(reply)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Sends a request to the handler hosted by the worker named `name`.
    ///
    /// [`MessageBus::dispatch`] on [`message_bus`](Self::message_bus) finds a
    /// handler wherever it lives but fails when several workers host the kind;
    /// this targets one worker. A worker with no live link (down, or
    /// [`Readiness::Spawned`](crate::Readiness::Spawned)) yields [`IpcError::NoHandler`].
    ///
    /// # Errors
    /// [`RuntimeError::UnknownWorker`] for an unknown name,
    /// [`RuntimeError::ShuttingDown`] once the supervisor has stopped.
    pub async fn dispatch_to_worker<M: Message>(
        &self,
        name: &str,
        msg: &M,
    ) -> Result<Pending<M::Reply>, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Peer {
                name: name.to_string(),
                reply,
            })
            .map_err(|_| RuntimeError::ShuttingDown)?;
        let peer = rx.await.map_err(|_| RuntimeError::ShuttingDown)??;
        Ok(match peer {
            Some(peer) => self.bus.dispatch_to(peer, msg),
            None => Pending::failed(
                M::KIND,
                IpcError::NoHandler {
                    kind: M::KIND.to_string(),
                },
            ),
        })
    }

    /// Scheduler-side view of every job.
    pub async fn scheduled_jobs(&self) -> Vec<ScheduledJob> {
        self.scheduler.jobs().await
    }

    /// Stops every worker (SIGTERM, then SIGKILL after the grace period) and
    /// waits for the supervisor to finish.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let _ = self.tx.send(Command::Shutdown);
        self.wait().await
    }

    /// Waits until the supervisor has stopped and returns its final result.
    pub async fn wait(&self) -> Result<(), RuntimeError> {
        let mut rx = self.outcome.clone();
        let done = rx.wait_for(Option::is_some).await;
        match done {
            Ok(outcome) => outcome.clone().unwrap_or(Err(RuntimeError::Closed)),
            Err(_) => Err(RuntimeError::Closed),
        }
    }

    /// Returns `true` once the supervisor has stopped.
    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Subscribes to observability events published from now on.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// The supervisor's message bus; worker channels are attached here.
    pub fn message_bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Boot record of this supervisor.
    pub fn server_status(&self) -> &ServerStatus {
        &self.status
    }
}

/// Forwards bus events to the subscriber set until the runtime stops, then
/// drains what is buffered and lets the subscriber queues empty.
fn subscriber_listener(events: &Bus, set: SubscriberSet, token: CancellationToken) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                ev = rx.recv() => match ev {
                    Ok(ev) => set.emit(&ev),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(target: TARGET, skipped = n, "subscriber listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = token.cancelled() => {
                    while let Ok(ev) = rx.try_recv() {
                        set.emit(&ev);
                    }
                    break;
                }
            }
        }
        set.shutdown().await;
    });
}

/// Routes worker handshakes and lifecycle events into the event loop.
fn register_handlers(bus: &MessageBus, tx: &mpsc::UnboundedSender<Command>) {
    let handshake_tx = tx.clone();
    bus.subscribe::<Handshake, _, _, _>(move |hs| forward_handshake(handshake_tx.clone(), hs));

    let lifecycle_tx = tx.clone();
    bus.subscribe::<LifecycleEvent, _, _, _>(move |ev| {
        let sent = lifecycle_tx
            .send(Command::Lifecycle(ev))
            .map_err(|_| RuntimeError::ShuttingDown);
        async move { sent }
    });
}

async fn forward_handshake(
    tx: mpsc::UnboundedSender<Command>,
    hs: Handshake,
) -> Result<HandshakeAck, RuntimeError> {
    let (reply, rx) = oneshot::channel();
    tx.send(Command::Handshake {
        pid: hs.pid,
        worker: hs.worker,
        handled_by: hs.handled_by,
        reply,
    })
    .map_err(|_| RuntimeError::ShuttingDown)?;
    rx.await.map_err(|_| RuntimeError::ShuttingDown)
}

fn validate_workers(workers: &[WorkerSpec]) -> Result<(), RuntimeError> {
    if workers.is_empty() {
        return Err(RuntimeError::configuration("no workers defined"));
    }
    let mut seen = HashSet::new();
    for w in workers {
        if w.name.is_empty() {
            return Err(RuntimeError::configuration("worker with an empty name"));
        }
        if w.command.is_empty() {
            return Err(RuntimeError::configuration(format!(
                "worker {:?} has no command",
                w.name
            )));
        }
        if !seen.insert(w.name.as_str()) {
            return Err(RuntimeError::configuration(format!(
                "duplicate worker name {:?}",
                w.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::events::EventKind;
    use crate::policies::{BackoffPolicy, JitterPolicy};
    use crate::process::testing::{Echo, FakeLauncher, Script, Signal};
    use crate::reload::{AllOf, EachRequest, Periodic};
    use crate::status::WorkerStatus;

    struct Recorder(Arc<Mutex<Vec<Event>>>);

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, ev: &Event) {
            self.0.lock().push(ev.clone());
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    fn count(seen: &Mutex<Vec<Event>>, kind: EventKind) -> usize {
        seen.lock().iter().filter(|e| e.kind == kind).count()
    }

    fn cfg() -> SupervisorConfig {
        SupervisorConfig {
            backoff: BackoffPolicy::immediate(),
            grace: Duration::from_secs(10),
            ..SupervisorConfig::default()
        }
    }

    fn spec(name: &str, command: &str) -> WorkerSpec {
        WorkerSpec::with_defaults(name, command, &SupervisorConfig::default())
    }

    async fn boot(
        launcher: &FakeLauncher,
        cfg: SupervisorConfig,
        workers: Vec<WorkerSpec>,
    ) -> (Result<SupervisorHandle, RuntimeError>, Arc<Mutex<Vec<Event>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let res = Supervisor::builder(cfg)
            .with_launcher(Arc::new(launcher.clone()))
            .with_subscribers(vec![Arc::new(Recorder(seen.clone()))])
            .build()
            .start(workers)
            .await;
        (res, seen)
    }

    #[test]
    fn test_duplicate_worker_names_are_rejected() {
        let err = validate_workers(&[spec("web", "/bin/a"), spec("web", "/bin/b")]).unwrap_err();
        assert_eq!(err.as_label(), "runtime_configuration");
        assert!(err.to_string().contains("duplicate worker name"));
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let err = validate_workers(&[spec("web", "")]).unwrap_err();
        assert!(err.to_string().contains("has no command"));
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        assert!(validate_workers(&[]).is_err());
        assert!(validate_workers(&[spec("web", "/bin/a")]).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_leaves_every_worker_running() {
        let launcher = FakeLauncher::uniform(Script::Serve);
        let (res, _) = boot(
            &launcher,
            cfg(),
            vec![spec("web", "web"), spec("queue", "queue")],
        )
        .await;
        let handle = res.unwrap();

        let workers = handle.workers().await;
        assert_eq!(workers.len(), 2);
        for w in &workers {
            assert_eq!(w.status, WorkerStatus::Running);
            assert!(w.pid.is_some());
            assert_eq!(w.handled_by, vec!["fake".to_string()]);
        }
        assert_eq!(handle.server_status().event_loop_kind(), "tokio-current-thread");

        handle.shutdown().await.unwrap();
        assert!(handle.is_finished());
        assert!(handle.workers().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_before_ready_aborts_whole_boot() {
        let launcher = FakeLauncher::new(|name, _| match name {
            "broken" => Script::CrashBeforeReady(3),
            _ => Script::Serve,
        });
        let (res, _) = boot(
            &launcher,
            cfg(),
            vec![spec("web", "web"), spec("broken", "broken")],
        )
        .await;

        let err = res.err().unwrap();
        assert!(matches!(err, RuntimeError::BootAborted { ref worker, .. } if worker == "broken"));
        let web = launcher.launches_of("web");
        assert_eq!(web.len(), 1);
        let signals = launcher.signals_to(web[0].pid);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal, Signal::Kill);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_deadline_aborts_boot() {
        let launcher = FakeLauncher::uniform(Script::Hang);
        let mut cfg = cfg();
        cfg.ready_timeout = Duration::from_secs(3);
        let started = tokio::time::Instant::now();
        let (res, _) = boot(&launcher, cfg, vec![spec("web", "web")]).await;

        assert!(matches!(res.err().unwrap(), RuntimeError::BootAborted { .. }));
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_exhaustion_is_fatal() {
        let launcher = FakeLauncher::uniform(Script::FailSpawn);
        let (res, seen) = boot(&launcher, cfg(), vec![spec("web", "web")]).await;

        let err = res.err().unwrap();
        assert!(matches!(err, RuntimeError::Fatal { attempts: 3, .. }));
        assert_eq!(err.exit_code(), 1);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count(&seen, EventKind::SpawnFailed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_failure_is_retried_during_boot() {
        let launcher = FakeLauncher::new(|_, nth| {
            if nth == 1 {
                Script::FailSpawn
            } else {
                Script::Serve
            }
        });
        let (res, _) = boot(&launcher, cfg(), vec![spec("web", "web")]).await;
        let handle = res.unwrap();
        assert_eq!(launcher.launches_of("web").len(), 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_strategy_reloads_once_in_35s() {
        let launcher = FakeLauncher::uniform(Script::Serve);
        let web = WorkerSpec::builder("web", "web")
            .strategy(Periodic::every_secs(30))
            .build(&cfg());
        let (res, seen) = boot(&launcher, cfg(), vec![web]).await;
        let handle = res.unwrap();

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count(&seen, EventKind::ReloadRequested), 1);
        assert_eq!(launcher.launches_of("web").len(), 2);

        let w = handle.worker("web").await.unwrap();
        assert_eq!(w.status, WorkerStatus::Running);
        assert_eq!(w.pid, Some(launcher.launches_of("web")[1].pid));
        assert_eq!(w.restart_count, 0);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_of_periodics_reloads_at_the_longest_period() {
        let launcher = FakeLauncher::uniform(Script::Serve);
        let web = WorkerSpec::builder("web", "web")
            .strategy(
                AllOf::default()
                    .and(Periodic::every_secs(60))
                    .and(Periodic::every_secs(15)),
            )
            .build(&cfg());
        let (res, seen) = boot(&launcher, cfg(), vec![web]).await;
        let handle = res.unwrap();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(count(&seen, EventKind::ReloadRequested), 0);
        assert_eq!(launcher.launches_of("web").len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count(&seen, EventKind::ReloadRequested), 1);
        assert_eq!(launcher.launches_of("web").len(), 2);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_request_reloads_once_per_request() {
        let launcher = FakeLauncher::new(|_, nth| {
            if nth <= 3 {
                Script::Requests(1)
            } else {
                Script::Serve
            }
        });
        let web = WorkerSpec::builder("web", "web").strategy(EachRequest).build(&cfg());
        let (res, seen) = boot(&launcher, cfg(), vec![web]).await;
        let handle = res.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count(&seen, EventKind::ReloadRequested), 3);
        assert_eq!(launcher.launches_of("web").len(), 4);
        assert_eq!(handle.worker("web").await.unwrap().status, WorkerStatus::Running);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_budget_marks_worker_failed() {
        let launcher = FakeLauncher::new(|name, _| match name {
            "flaky" => Script::Crash(1),
            _ => Script::Serve,
        });
        let flaky = WorkerSpec::builder("flaky", "flaky").max_restarts(2).build(&cfg());
        let (res, seen) = boot(&launcher, cfg(), vec![flaky, spec("web", "web")]).await;
        let handle = res.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(launcher.launches_of("flaky").len(), 3);
        assert_eq!(count(&seen, EventKind::BackoffScheduled), 2);
        assert_eq!(count(&seen, EventKind::WorkerFailed), 1);

        let flaky = handle.worker("flaky").await.unwrap();
        assert!(flaky.failed);
        assert_eq!(flaky.status, WorkerStatus::Shutdown);
        assert_eq!(flaky.last_exit_code, Some(1));
        assert_eq!(handle.worker("web").await.unwrap().status, WorkerStatus::Running);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_respawn_delays_grow_exponentially() {
        let launcher = FakeLauncher::uniform(Script::Crash(1));
        let backoff = BackoffPolicy {
            first: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: JitterPolicy::None,
        };
        let flaky = WorkerSpec::builder("flaky", "flaky")
            .backoff(backoff)
            .max_restarts(10)
            .build(&cfg());
        let (res, seen) = boot(&launcher, cfg(), vec![flaky]).await;
        let handle = res.unwrap();

        // Crashes at +10ms, then waits 1s, 2s and 4s before the next launches.
        tokio::time::sleep(Duration::from_millis(7500)).await;
        let launches = launcher.launches_of("flaky");
        assert_eq!(launches.len(), 4);
        for (pair, secs) in launches.windows(2).zip([1, 2, 4]) {
            let gap = pair[1].at - pair[0].at - Duration::from_millis(10);
            let expected = Duration::from_secs(secs);
            assert!(
                (expected..expected + Duration::from_millis(5)).contains(&gap),
                "gap {gap:?}, expected {expected:?}"
            );
        }
        let delays: Vec<_> = seen
            .lock()
            .iter()
            .filter(|e| e.kind == EventKind::BackoffScheduled)
            .map(|e| (e.attempt, e.delay_ms))
            .collect();
        assert_eq!(
            delays,
            vec![
                (Some(1), Some(1000)),
                (Some(2), Some(2000)),
                (Some(3), Some(4000)),
            ]
        );
        assert_eq!(handle.worker("flaky").await.unwrap().restart_count, 3);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_uptime_resets_restart_budget() {
        // Second launch lives 6s in "steady" (past reset_after) but only 2s in "short".
        let launcher = FakeLauncher::new(|name, nth| match (name, nth) {
            (_, 1) | (_, 3..) => Script::Crash(1),
            ("steady", _) => Script::CrashAfter(Duration::from_secs(6), 1),
            _ => Script::CrashAfter(Duration::from_secs(2), 1),
        });
        let worker = |name: &str| {
            WorkerSpec::builder(name, name)
                .max_restarts(1)
                .reset_after(Duration::from_secs(5))
                .build(&cfg())
        };
        let (res, seen) = boot(&launcher, cfg(), vec![worker("steady"), worker("short")]).await;
        let handle = res.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(launcher.launches_of("short").len(), 2);
        assert_eq!(launcher.launches_of("steady").len(), 3);
        assert_eq!(count(&seen, EventKind::WorkerFailed), 2);

        let short = handle.worker("short").await.unwrap();
        assert!(short.failed);
        assert_eq!(short.restart_count, 1);
        let steady = handle.worker("steady").await.unwrap();
        assert!(steady.failed);
        assert_eq!(steady.restart_count, 1);

        let failed_order: Vec<String> = seen
            .lock()
            .iter()
            .filter(|e| e.kind == EventKind::WorkerFailed)
            .filter_map(|e| e.worker.as_deref().map(str::to_string))
            .collect();
        assert_eq!(failed_order, vec!["short", "steady"]);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_exit_is_not_restarted_on_failure_policy() {
        let launcher = FakeLauncher::uniform(Script::Crash(0));
        let (res, _) = boot(&launcher, cfg(), vec![spec("once", "once")]).await;
        let handle = res.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(launcher.launches().len(), 1);
        let w = handle.worker("once").await.unwrap();
        assert!(!w.failed);
        assert_eq!(w.status, WorkerStatus::Shutdown);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_grace_kills_exactly_once() {
        let launcher = FakeLauncher::new(|_, nth| {
            if nth == 1 {
                Script::Stubborn
            } else {
                Script::Serve
            }
        });
        let (res, seen) = boot(&launcher, cfg(), vec![spec("web", "web")]).await;
        let handle = res.unwrap();
        let first = launcher.launches_of("web")[0].pid;

        let outcome = handle
            .request_reload("web", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(outcome, ReloadOutcome::Started);
        tokio::time::sleep(Duration::from_secs(6)).await;

        let signals = launcher.signals_to(first);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].signal, Signal::Term);
        assert_eq!(signals[1].signal, Signal::Kill);
        assert_eq!(signals[1].at - signals[0].at, Duration::from_secs(5));
        assert_eq!(count(&seen, EventKind::ReloadTimeout), 1);

        let launches = launcher.launches_of("web");
        assert_eq!(launches.len(), 2);
        assert_eq!(launches[1].at, signals[1].at);
        let w = handle.worker("web").await.unwrap();
        assert_eq!(w.status, WorkerStatus::Running);
        assert_eq!(w.pid, Some(launches[1].pid));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reloads_coalesce() {
        let launcher = FakeLauncher::new(|_, nth| {
            if nth == 1 {
                Script::Stubborn
            } else {
                Script::Serve
            }
        });
        let (res, _) = boot(&launcher, cfg(), vec![spec("web", "web")]).await;
        let handle = res.unwrap();
        let pid = handle.worker("web").await.unwrap().pid.unwrap();

        let (a, b) = tokio::join!(
            handle.request_reload("web", Some(Duration::from_secs(1))),
            handle.request_reload_pid(pid, None),
        );
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| *o != ReloadOutcome::Started);
        assert_eq!(outcomes, vec![ReloadOutcome::Started, ReloadOutcome::Coalesced]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(launcher.launches_of("web").len(), 2);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_unknown_worker() {
        let launcher = FakeLauncher::uniform(Script::Serve);
        let (res, _) = boot(&launcher, cfg(), vec![spec("web", "web")]).await;
        let handle = res.unwrap();

        let err = handle.request_reload("nope", None).await.unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownWorker { .. }));
        handle.shutdown().await.unwrap();
        let err = handle.request_reload("web", None).await.unwrap_err();
        assert_eq!(err, RuntimeError::ShuttingDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_grace_exceeded_reports_stuck() {
        let launcher = FakeLauncher::new(|name, _| match name {
            "stuck" => Script::Stubborn,
            _ => Script::Serve,
        });
        let mut cfg = cfg();
        cfg.grace = Duration::from_secs(2);
        let (res, seen) = boot(
            &launcher,
            cfg,
            vec![spec("web", "web"), spec("stuck", "stuck")],
        )
        .await;
        let handle = res.unwrap();

        let started = tokio::time::Instant::now();
        let err = handle.shutdown().await.unwrap_err();
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert_eq!(
            err,
            RuntimeError::GraceExceeded {
                grace: Duration::from_secs(2),
                stuck: vec!["stuck".into()],
            }
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count(&seen, EventKind::GraceExceeded), 1);
        assert_eq!(count(&seen, EventKind::AllStoppedWithin), 0);
        assert_eq!(handle.wait().await, Err(err));
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_announcements_are_tracked_idempotently() {
        let launcher = FakeLauncher::uniform(Script::Serve);
        let (res, _) = boot(&launcher, cfg(), vec![spec("web", "web")]).await;
        let handle = res.unwrap();
        let bus = handle.message_bus();
        let next = chrono::Utc::now();

        bus.publish(&LifecycleEvent::ProcessStarted { job_id: 7 }).await.unwrap();
        for _ in 0..2 {
            bus.publish(&LifecycleEvent::ProcessScheduled {
                job_id: 7,
                next_run_date: Some(next),
            })
            .await
            .unwrap();
        }

        let jobs = handle.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].runs, 1);
        assert_eq!(jobs[0].next_run_date, Some(next));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_reaches_handler_inside_worker() {
        let launcher = FakeLauncher::new(|name, _| match name {
            "web" => Script::Echo,
            _ => Script::Serve,
        });
        let (res, _) = boot(
            &launcher,
            cfg(),
            vec![spec("web", "web"), spec("queue", "queue")],
        )
        .await;
        let handle = res.unwrap();

        let reply = handle
            .message_bus()
            .dispatch(&Echo("hi".into()))
            .await
            .unwrap();
        assert_eq!(reply, "web: hi");
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_to_worker_targets_one_of_several_hosts() {
        let launcher = FakeLauncher::uniform(Script::Echo);
        let (res, _) = boot(
            &launcher,
            cfg(),
            vec![spec("web", "web"), spec("queue", "queue")],
        )
        .await;
        let handle = res.unwrap();

        let err = handle
            .message_bus()
            .dispatch(&Echo("hi".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::AmbiguousHandler { count: 2, .. }));

        let pending = handle
            .dispatch_to_worker("queue", &Echo("hi".into()))
            .await
            .unwrap();
        assert_eq!(pending.await.unwrap(), "queue: hi");
        let err = handle
            .dispatch_to_worker("nope", &Echo("hi".into()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::UnknownWorker { .. }));

        // The replacement process is reachable through the same name.
        handle.request_reload("queue", None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(launcher.launches_of("queue").len(), 2);
        let pending = handle
            .dispatch_to_worker("queue", &Echo("again".into()))
            .await
            .unwrap();
        assert_eq!(pending.await.unwrap(), "queue: again");
        handle.shutdown().await.unwrap();
    }
}
