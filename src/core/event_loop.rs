//! # Supervisor event loop.
//!
//! A single tokio task owns the [`Registry`] and multiplexes everything that can
//! change a worker's state:
//!
//! ```text
//!                      ┌──────────────────────────────────────────────┐
//! launch tasks ──────► │                                              │
//! exit watchers ─────► │  commands (mpsc)          timers (DelayQueue)│
//! bus handlers ──────► │   Spawned / Exited         Respawn           │
//!   (handshake,        │   Handshake / Lifecycle    ReloadGrace       │
//!    lifecycle)        │   Reload / Snapshot        Tick (strategy)   │
//! SupervisorHandle ──► │   Shutdown                 BootDeadline      │
//!                      │                            ShutdownGrace     │
//!                      └──────────────────────────────────────────────┘
//! ```
//!
//! No handler awaits: process creation runs in a spawned task that reports back
//! with `Spawned`, and every wait is a timer. Timers carry the slot generation
//! they were armed for and are ignored once the slot has moved on.
//!
//! ## Reload protocol
//! ```text
//! RUNNING ──reload──► STOPPING (SIGTERM, grace timer)
//!    ├─ exit before grace ───────────────────► SHUTDOWN ──► replacement launched
//!    └─ grace fires (still STOPPING) ──SIGKILL once──► exit ──► SHUTDOWN ──► replacement
//! Reload while STOPPING for a reload → coalesced into the pending one.
//! ```
//!
//! ## Unexpected exit
//! ```text
//! uptime >= reset_after      → restart_count = 0
//! restart policy says finish → worker stays SHUTDOWN
//! restart_count >= max       → worker permanently failed (siblings keep running)
//! otherwise                  → restart_count += 1, respawn after backoff.next(restart_count - 1)
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;

use super::config::SupervisorConfig;
use super::registry::Registry;
use crate::error::{RuntimeError, SpawnError};
use crate::events::{Bus, Event, EventKind};
use crate::ipc::{HandshakeAck, LifecycleEvent, MessageBus, PeerId};
use crate::process::{Launched, Launcher};
use crate::reload::ReloadEvent;
use crate::status::{JobSnapshot, WorkerSnapshot, WorkerStatus};
use crate::worker::Readiness;

const TARGET: &str = "procvisor::supervisor";

/// Final result of a supervisor run, published once by the loop.
pub(crate) type Outcome = Option<Result<(), RuntimeError>>;

/// Result of a reload request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The worker was asked to stop; a replacement follows its exit.
    Started,
    /// A reload of this worker was already in progress; no extra replacement.
    Coalesced,
    /// The worker is not RUNNING (starting, down, or failed); nothing was done.
    NotRunning,
}

/// Worker addressed by a reload request.
#[derive(Clone, Debug)]
pub(crate) enum Target {
    Name(String),
    Pid(u32),
}

pub(crate) enum Command {
    Spawned {
        slot: usize,
        generation: u64,
        result: Result<Launched, SpawnError>,
    },
    Exited {
        slot: usize,
        generation: u64,
        code: Option<i32>,
    },
    Handshake {
        pid: u32,
        worker: String,
        handled_by: Vec<String>,
        reply: oneshot::Sender<HandshakeAck>,
    },
    Lifecycle(LifecycleEvent),
    Reload {
        target: Target,
        grace: Option<Duration>,
        reply: oneshot::Sender<Result<ReloadOutcome, RuntimeError>>,
    },
    Workers(oneshot::Sender<Vec<WorkerSnapshot>>),
    Peer {
        name: String,
        reply: oneshot::Sender<Result<Option<PeerId>, RuntimeError>>,
    },
    Jobs(oneshot::Sender<Vec<JobSnapshot>>),
    Shutdown,
}

#[derive(Clone, Copy, Debug)]
enum Timer {
    Respawn { slot: usize, generation: u64 },
    ReloadGrace {
        slot: usize,
        generation: u64,
        grace: Duration,
    },
    /// `due` is the RUNNING time this tick stands for, a multiple of `every`.
    Tick {
        slot: usize,
        generation: u64,
        strategy: usize,
        every: Duration,
        due: Duration,
    },
    BootDeadline,
    ShutdownGrace,
}

#[derive(Debug, PartialEq, Eq)]
enum Phase {
    Booting,
    Running,
    Stopping,
    Aborting,
}

pub(crate) struct EventLoop {
    cfg: SupervisorConfig,
    registry: Registry,
    launcher: Arc<dyn Launcher>,
    bus: MessageBus,
    events: Bus,
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
    timers: DelayQueue<Timer>,
    jobs: BTreeMap<u64, JobSnapshot>,
    phase: Phase,
    boot_reply: Option<oneshot::Sender<Result<(), RuntimeError>>>,
    abort_cause: Option<RuntimeError>,
    stuck: Vec<String>,
    force_kill: bool,
    outcome: watch::Sender<Outcome>,
    runtime_token: CancellationToken,
    finished: bool,
}

pub(crate) struct LoopParts {
    pub(crate) cfg: SupervisorConfig,
    pub(crate) registry: Registry,
    pub(crate) launcher: Arc<dyn Launcher>,
    pub(crate) bus: MessageBus,
    pub(crate) events: Bus,
    pub(crate) tx: mpsc::UnboundedSender<Command>,
    pub(crate) rx: mpsc::UnboundedReceiver<Command>,
    pub(crate) boot_reply: oneshot::Sender<Result<(), RuntimeError>>,
    pub(crate) outcome: watch::Sender<Outcome>,
    pub(crate) runtime_token: CancellationToken,
}

impl EventLoop {
    pub(crate) fn new(parts: LoopParts) -> Self {
        Self {
            cfg: parts.cfg,
            registry: parts.registry,
            launcher: parts.launcher,
            bus: parts.bus,
            events: parts.events,
            tx: parts.tx,
            rx: parts.rx,
            timers: DelayQueue::new(),
            jobs: BTreeMap::new(),
            phase: Phase::Booting,
            boot_reply: Some(parts.boot_reply),
            abort_cause: None,
            stuck: Vec::new(),
            force_kill: false,
            outcome: parts.outcome,
            runtime_token: parts.runtime_token,
            finished: false,
        }
    }

    /// Boots every worker and serves until shutdown or a fatal error.
    pub(crate) async fn run(mut self) {
        tracing::info!(target: TARGET, workers = self.registry.len(), "supervisor booting");
        if let Some(deadline) = self.cfg.ready_deadline() {
            self.timers.insert(Timer::BootDeadline, deadline);
        }
        for idx in 0..self.registry.len() {
            self.launch(idx);
        }
        self.check_boot();

        while !self.finished {
            tokio::select! {
                Some(cmd) = self.rx.recv() => self.on_command(cmd),
                Some(expired) = self.timers.next(), if !self.timers.is_empty() => {
                    self.on_timer(expired.into_inner());
                }
            }
        }
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Spawned {
                slot,
                generation,
                result,
            } => self.on_spawned(slot, generation, result),
            Command::Exited {
                slot,
                generation,
                code,
            } => self.on_exit(slot, generation, code),
            Command::Handshake {
                pid,
                worker,
                handled_by,
                reply,
            } => {
                let ack = self.on_handshake(pid, worker, handled_by);
                let _ = reply.send(ack);
            }
            Command::Lifecycle(ev) => self.on_lifecycle(ev),
            Command::Reload {
                target,
                grace,
                reply,
            } => {
                let result = self.reload_target(target, grace);
                let _ = reply.send(result);
            }
            Command::Workers(reply) => {
                let _ = reply.send(self.registry.snapshot());
            }
            Command::Peer { name, reply } => {
                let result = match self.registry.find(&name) {
                    Some(idx) => Ok(self.registry.get(idx).and_then(|s| s.peer)),
                    None => Err(RuntimeError::UnknownWorker { name }),
                };
                let _ = reply.send(result);
            }
            Command::Jobs(reply) => {
                let _ = reply.send(self.jobs.values().cloned().collect());
            }
            Command::Shutdown => self.begin_shutdown(),
        }
    }

    fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Respawn { slot, generation } => {
                if !matches!(self.phase, Phase::Booting | Phase::Running) {
                    return;
                }
                let due = self.registry.get(slot).is_some_and(|s| {
                    s.generation == generation
                        && s.status == WorkerStatus::Shutdown
                        && !s.launching
                        && !s.failed
                });
                if due {
                    self.launch(slot);
                }
            }
            Timer::ReloadGrace {
                slot,
                generation,
                grace,
            } => self.on_reload_grace(slot, generation, grace),
            Timer::Tick {
                slot,
                generation,
                strategy,
                every,
                due,
            } => self.on_tick(slot, generation, strategy, every, due),
            Timer::BootDeadline => {
                if self.phase != Phase::Booting {
                    return;
                }
                let laggard = self
                    .registry
                    .iter()
                    .find(|s| s.status != WorkerStatus::Running)
                    .map(|s| s.name().to_string())
                    .unwrap_or_default();
                self.abort(RuntimeError::BootAborted {
                    worker: laggard,
                    reason: format!("not ready within {:?}", self.cfg.ready_timeout),
                });
            }
            Timer::ShutdownGrace => {
                if self.phase != Phase::Stopping {
                    return;
                }
                self.stuck = self.registry.live_names();
                self.force_kill = true;
                tracing::warn!(
                    target: TARGET,
                    stuck = ?self.stuck,
                    grace = ?self.cfg.grace,
                    "shutdown grace exceeded, killing"
                );
                for slot in self.registry.iter_mut().filter(|s| s.status.is_live()) {
                    slot.kill();
                }
                self.check_finished();
            }
        }
    }

    // === Spawn ===

    fn launch(&mut self, idx: usize) {
        let Some(slot) = self.registry.get_mut(idx) else {
            return;
        };
        if !slot.transition(WorkerStatus::Starting) {
            return;
        }
        slot.generation += 1;
        slot.launching = true;
        slot.reload_pending = false;
        slot.killed = false;
        slot.handled_by.clear();

        let generation = slot.generation;
        let spec = slot.spec.clone();
        let launcher = Arc::clone(&self.launcher);
        let tx = self.tx.clone();
        tracing::debug!(target: TARGET, worker = %spec.name, generation, "launching");
        tokio::spawn(async move {
            let result = launcher.launch(&spec).await;
            let _ = tx.send(Command::Spawned {
                slot: idx,
                generation,
                result,
            });
        });
    }

    fn on_spawned(&mut self, idx: usize, generation: u64, result: Result<Launched, SpawnError>) {
        let phase_live = matches!(self.phase, Phase::Booting | Phase::Running);
        let Some(slot) = self.registry.get_mut(idx) else {
            return;
        };
        if slot.generation != generation || !slot.launching {
            if let Ok(launched) = result {
                let _ = launched.control.kill();
            }
            return;
        }
        slot.launching = false;

        let launched = match result {
            Ok(launched) => launched,
            Err(e) => {
                slot.transition(WorkerStatus::Shutdown);
                slot.spawn_failures += 1;
                let attempts = slot.spawn_failures;
                let name = slot.name().to_string();
                let delay = slot.spec.backoff.next(attempts.saturating_sub(1));
                tracing::error!(
                    target: TARGET,
                    worker = %name,
                    attempts,
                    error = %e,
                    "spawn failed"
                );
                self.events.publish(
                    Event::new(EventKind::SpawnFailed)
                        .with_worker(name.as_str())
                        .with_attempt(attempts)
                        .with_reason(e.to_string()),
                );
                if !phase_live {
                    self.check_finished();
                } else if attempts >= self.cfg.spawn_attempts_clamped() {
                    self.abort(RuntimeError::Fatal {
                        worker: name,
                        attempts,
                        reason: e.to_string(),
                    });
                } else {
                    self.timers
                        .insert(Timer::Respawn { slot: idx, generation }, delay);
                }
                return;
            }
        };

        let Launched {
            pid,
            control,
            exit,
            channel,
        } = launched;
        slot.spawn_failures = 0;
        slot.control = Some(control);
        slot.started_at = Some(Instant::now());
        slot.peer = channel.map(|c| self.bus.attach(c.reader, c.writer));
        let restarts = slot.restart_count;
        let name = slot.name().to_string();
        let readiness = slot.spec.readiness;
        self.registry.bind_pid(idx, pid);

        let tx = self.tx.clone();
        tokio::spawn(async move {
            let code = exit.await;
            let _ = tx.send(Command::Exited {
                slot: idx,
                generation,
                code,
            });
        });

        tracing::info!(target: TARGET, worker = %name, pid, restarts, "worker starting");
        self.events.publish(
            Event::new(EventKind::WorkerStarting)
                .with_worker(name.as_str())
                .with_pid(pid)
                .with_attempt(restarts),
        );

        match self.phase {
            Phase::Stopping => {
                let force = self.force_kill;
                if let Some(slot) = self.registry.get_mut(idx) {
                    if force {
                        slot.kill();
                    } else {
                        slot.terminate();
                    }
                }
            }
            Phase::Aborting => {
                if let Some(slot) = self.registry.get_mut(idx) {
                    slot.kill();
                }
            }
            Phase::Booting | Phase::Running => {
                if readiness == Readiness::Spawned {
                    self.mark_running(idx);
                }
            }
        }
    }

    fn on_handshake(&mut self, pid: u32, worker: String, handled_by: Vec<String>) -> HandshakeAck {
        let Some(idx) = self.registry.by_pid(pid) else {
            tracing::debug!(
                target: TARGET,
                pid,
                announced = %worker,
                "handshake from unsupervised process"
            );
            return HandshakeAck { worker };
        };
        let Some(slot) = self.registry.get_mut(idx) else {
            return HandshakeAck { worker };
        };
        slot.handled_by = handled_by;
        let name = slot.name().to_string();
        if slot.status == WorkerStatus::Starting {
            self.mark_running(idx);
        }
        HandshakeAck { worker: name }
    }

    fn mark_running(&mut self, idx: usize) {
        let Some(slot) = self.registry.get_mut(idx) else {
            return;
        };
        if !slot.transition(WorkerStatus::Running) {
            return;
        }
        let generation = slot.generation;
        let name = slot.name().to_string();
        let pid = slot.pid;
        let ticks: Vec<(usize, Duration)> = slot.spec.timer_intervals().collect();
        for (strategy, every) in ticks {
            self.timers.insert(
                Timer::Tick {
                    slot: idx,
                    generation,
                    strategy,
                    every,
                    due: every,
                },
                every,
            );
        }

        tracing::info!(target: TARGET, worker = %name, pid = ?pid, "worker running");
        let mut ev = Event::new(EventKind::WorkerRunning).with_worker(name.as_str());
        if let Some(pid) = pid {
            ev = ev.with_pid(pid);
        }
        self.events.publish(ev);
        self.check_boot();
    }

    fn check_boot(&mut self) {
        if self.phase != Phase::Booting || !self.registry.all_running() {
            return;
        }
        self.phase = Phase::Running;
        tracing::info!(target: TARGET, workers = self.registry.len(), "all workers running");
        if let Some(reply) = self.boot_reply.take() {
            let _ = reply.send(Ok(()));
        }
    }

    // === Exit ===

    fn on_exit(&mut self, idx: usize, generation: u64, code: Option<i32>) {
        let Some(slot) = self.registry.get_mut(idx) else {
            return;
        };
        if slot.generation != generation {
            return;
        }
        let prior = slot.status;
        let uptime = slot
            .started_at
            .take()
            .map(|t| t.elapsed())
            .unwrap_or_default();
        let reloading = slot.reload_pending;
        slot.transition(WorkerStatus::Shutdown);
        slot.last_exit_code = code;
        slot.control = None;
        slot.reload_pending = false;
        let peer = slot.peer.take();
        let pid = slot.pid;
        let name = slot.name().to_string();
        self.registry.release_pid(idx);
        if let Some(peer) = peer {
            self.bus.detach(peer);
        }

        tracing::info!(
            target: TARGET,
            worker = %name,
            pid = ?pid,
            exit_code = ?code,
            ?uptime,
            "worker exited"
        );
        let mut ev = Event::new(EventKind::WorkerExited)
            .with_worker(name.as_str())
            .with_exit_code(code);
        if let Some(pid) = pid {
            ev = ev.with_pid(pid);
        }
        self.events.publish(ev);

        match self.phase {
            Phase::Stopping | Phase::Aborting => self.check_finished(),
            Phase::Booting if prior == WorkerStatus::Starting => {
                self.abort(RuntimeError::BootAborted {
                    worker: name,
                    reason: format!("exited with {code:?} before becoming ready"),
                });
            }
            Phase::Booting | Phase::Running => {
                if reloading {
                    tracing::debug!(
                        target: TARGET,
                        worker = %name,
                        "reload: launching replacement"
                    );
                    self.launch(idx);
                } else {
                    self.on_unexpected_exit(idx, code, uptime);
                }
            }
        }
    }

    fn on_unexpected_exit(&mut self, idx: usize, code: Option<i32>, uptime: Duration) {
        let Some(slot) = self.registry.get_mut(idx) else {
            return;
        };
        if uptime >= slot.spec.reset_after && slot.restart_count > 0 {
            tracing::debug!(
                target: TARGET,
                worker = %slot.spec.name,
                ?uptime,
                "restart budget reset"
            );
            slot.restart_count = 0;
        }
        let abnormal = code != Some(0);
        let name = slot.name().to_string();

        if !slot.spec.restart.wants_restart(abnormal) {
            tracing::info!(
                target: TARGET,
                worker = %name,
                exit_code = ?code,
                "worker finished, not restarted"
            );
            return;
        }

        if slot.restart_count >= slot.spec.max_restarts {
            slot.failed = true;
            let reason = format!(
                "restart budget of {} exhausted (last exit {code:?})",
                slot.spec.max_restarts
            );
            tracing::error!(target: TARGET, worker = %name, exit_code = ?code, "{reason}");
            self.events.publish(
                Event::new(EventKind::WorkerFailed)
                    .with_worker(name.as_str())
                    .with_exit_code(code)
                    .with_reason(reason),
            );
            return;
        }

        slot.restart_count += 1;
        let attempt = slot.restart_count;
        let delay = slot.spec.backoff.next(attempt - 1);
        let generation = slot.generation;
        tracing::warn!(
            target: TARGET,
            worker = %name,
            exit_code = ?code,
            attempt,
            ?delay,
            "worker crashed, respawning"
        );
        self.events.publish(
            Event::new(EventKind::BackoffScheduled)
                .with_worker(name.as_str())
                .with_exit_code(code)
                .with_attempt(attempt)
                .with_delay(delay),
        );
        self.timers.insert(Timer::Respawn { slot: idx, generation }, delay);
    }

    // === Reload ===

    fn reload_target(
        &mut self,
        target: Target,
        grace: Option<Duration>,
    ) -> Result<ReloadOutcome, RuntimeError> {
        if !matches!(self.phase, Phase::Booting | Phase::Running) {
            return Err(RuntimeError::ShuttingDown);
        }
        let idx = match &target {
            Target::Name(name) => self.registry.find(name),
            Target::Pid(pid) => self.registry.by_pid(*pid),
        };
        let Some(idx) = idx else {
            return Err(RuntimeError::UnknownWorker {
                name: match target {
                    Target::Name(name) => name,
                    Target::Pid(pid) => format!("pid {pid}"),
                },
            });
        };
        Ok(self.request_reload(idx, grace))
    }

    fn request_reload(&mut self, idx: usize, grace: Option<Duration>) -> ReloadOutcome {
        let Some(slot) = self.registry.get_mut(idx) else {
            return ReloadOutcome::NotRunning;
        };
        match slot.status {
            WorkerStatus::Stopping if slot.reload_pending => return ReloadOutcome::Coalesced,
            WorkerStatus::Running => {}
            _ => return ReloadOutcome::NotRunning,
        }
        let grace = grace.unwrap_or(slot.spec.reload_grace);
        slot.transition(WorkerStatus::Stopping);
        slot.reload_pending = true;
        slot.terminate();
        let generation = slot.generation;
        let name = slot.name().to_string();
        let pid = slot.pid;

        tracing::info!(target: TARGET, worker = %name, pid = ?pid, ?grace, "reload requested");
        let mut ev = Event::new(EventKind::ReloadRequested)
            .with_worker(name.as_str())
            .with_timeout(grace);
        if let Some(pid) = pid {
            ev = ev.with_pid(pid);
        }
        self.events.publish(ev);
        self.timers.insert(
            Timer::ReloadGrace {
                slot: idx,
                generation,
                grace,
            },
            grace,
        );
        ReloadOutcome::Started
    }

    fn on_reload_grace(&mut self, idx: usize, generation: u64, grace: Duration) {
        let Some(slot) = self.registry.get_mut(idx) else {
            return;
        };
        if slot.generation != generation
            || slot.status != WorkerStatus::Stopping
            || !slot.reload_pending
            || slot.killed
        {
            return;
        }
        let name = slot.name().to_string();
        let pid = slot.pid;
        tracing::warn!(
            target: TARGET,
            worker = %name,
            pid = ?pid,
            "reload grace exceeded, killing"
        );
        slot.kill();
        let mut ev = Event::new(EventKind::ReloadTimeout)
            .with_worker(name.as_str())
            .with_timeout(grace);
        if let Some(pid) = pid {
            ev = ev.with_pid(pid);
        }
        self.events.publish(ev);
    }

    fn on_tick(
        &mut self,
        idx: usize,
        generation: u64,
        strategy: usize,
        every: Duration,
        due: Duration,
    ) {
        let Some(slot) = self.registry.get(idx) else {
            return;
        };
        if slot.generation != generation || slot.status != WorkerStatus::Running {
            return;
        }
        let Some(s) = slot.spec.strategies.get(strategy) else {
            return;
        };
        if s.should_reload(&ReloadEvent::Timer { elapsed: due }) {
            tracing::debug!(
                target: TARGET,
                worker = %slot.spec.name,
                strategy = ?s,
                elapsed = ?due,
                "timer strategy requested reload"
            );
            self.request_reload(idx, None);
            return;
        }
        self.timers.insert(
            Timer::Tick {
                slot: idx,
                generation,
                strategy,
                every,
                due: due + every,
            },
            every,
        );
    }

    fn on_lifecycle(&mut self, ev: LifecycleEvent) {
        match &ev {
            LifecycleEvent::ProcessStarted { job_id } => {
                let job = self.job_entry(*job_id);
                job.runs += 1;
                job.next_run_date = None;
                return;
            }
            LifecycleEvent::ProcessScheduled {
                job_id,
                next_run_date,
            } => {
                self.job_entry(*job_id).next_run_date = *next_run_date;
                return;
            }
            _ => {}
        }

        let Some(pid) = ev.pid() else { return };
        let Some(idx) = self.registry.by_pid(pid) else {
            tracing::trace!(
                target: TARGET,
                pid,
                event = ev.as_label(),
                "event from unsupervised process"
            );
            return;
        };
        let Some(slot) = self.registry.get(idx) else {
            return;
        };
        if slot.status != WorkerStatus::Running {
            return;
        }
        let input = ReloadEvent::Lifecycle(&ev);
        if slot.spec.strategies.iter().any(|s| s.should_reload(&input)) {
            tracing::debug!(
                target: TARGET,
                worker = %slot.spec.name,
                event = ev.as_label(),
                "strategy requested reload"
            );
            self.request_reload(idx, None);
        }
    }

    fn job_entry(&mut self, id: u64) -> &mut JobSnapshot {
        self.jobs.entry(id).or_insert_with(|| JobSnapshot {
            id,
            runs: 0,
            next_run_date: None,
        })
    }

    // === Teardown ===

    fn begin_shutdown(&mut self) {
        if matches!(self.phase, Phase::Stopping | Phase::Aborting) {
            return;
        }
        self.phase = Phase::Stopping;
        tracing::info!(target: TARGET, grace = ?self.cfg.grace, "shutdown requested");
        self.events.publish(Event::new(EventKind::ShutdownRequested));

        if self.cfg.grace.is_zero() {
            self.stuck = self.registry.live_names();
            self.force_kill = true;
            for slot in self.registry.iter_mut() {
                slot.kill();
            }
        } else {
            for slot in self.registry.iter_mut().filter(|s| s.status.is_live()) {
                slot.terminate();
            }
            self.timers.insert(Timer::ShutdownGrace, self.cfg.grace);
        }
        self.check_finished();
    }

    fn abort(&mut self, cause: RuntimeError) {
        if matches!(self.phase, Phase::Stopping | Phase::Aborting) {
            return;
        }
        tracing::error!(target: TARGET, error = %cause, "supervisor aborting");
        self.phase = Phase::Aborting;
        self.abort_cause = Some(cause);
        for slot in self.registry.iter_mut() {
            slot.kill();
        }
        self.check_finished();
    }

    fn check_finished(&mut self) {
        if !matches!(self.phase, Phase::Stopping | Phase::Aborting) || !self.registry.all_down() {
            return;
        }

        let result = match self.abort_cause.take() {
            Some(cause) => Err(cause),
            None if self.stuck.is_empty() => {
                self.events.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            None => {
                let stuck = std::mem::take(&mut self.stuck);
                self.events.publish(
                    Event::new(EventKind::GraceExceeded)
                        .with_timeout(self.cfg.grace)
                        .with_reason(stuck.join(",")),
                );
                Err(RuntimeError::GraceExceeded {
                    grace: self.cfg.grace,
                    stuck,
                })
            }
        };

        match &result {
            Ok(()) => tracing::info!(target: TARGET, "all workers stopped"),
            Err(e) => tracing::warn!(target: TARGET, error = %e, "supervisor stopped"),
        }
        if let Some(reply) = self.boot_reply.take() {
            let _ = reply.send(Err(match &result {
                Err(e) => e.clone(),
                Ok(()) => RuntimeError::ShuttingDown,
            }));
        }
        self.runtime_token.cancel();
        self.bus.close();
        let _ = self.outcome.send(Some(result));
        self.finished = true;
    }
}
