//! # Scheduler loop.
//!
//! One tokio task owns every [`ScheduledJob`] and a `DelayQueue` holding at most
//! one timer per job. Runs execute in a `JoinSet` so the loop keeps serving
//! timers and snapshot requests while a job process is alive.
//!
//! ```text
//! select! {
//!   cancel            → stop (running job processes are killed on drop)
//!   timer(job)        → ProcessStarted, launch entrypoint
//!   run finished(job) → reschedule from the trigger → ProcessScheduled | retire
//!   Jobs(reply)       → snapshot
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;

use super::job::{JobSpec, ScheduledJob};
use crate::clock::Clock;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::ipc::{LifecycleEvent, MessageBus};
use crate::process::Launcher;
use crate::worker::WorkerSpec;

const TARGET: &str = "procvisor::scheduler";

enum Command {
    Jobs(oneshot::Sender<Vec<ScheduledJob>>),
}

struct RunOutcome {
    id: u64,
    pid: Option<u32>,
}

/// Trigger-driven job scheduler.
///
/// Usually started by the supervisor (see
/// [`SupervisorBuilder::with_jobs`](crate::SupervisorBuilder::with_jobs)); can
/// also run standalone.
pub struct Scheduler {
    jobs: Vec<JobSpec>,
    bus: MessageBus,
    launcher: Arc<dyn Launcher>,
    events: Bus,
    clock: Clock,
}

impl Scheduler {
    /// Creates a scheduler announcing runs on `bus` and launching entrypoints with `launcher`.
    pub fn new(bus: MessageBus, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            jobs: Vec::new(),
            bus,
            launcher,
            events: Bus::new(1024),
            clock: Clock::default(),
        }
    }

    /// Publishes observability events on `events` instead of a private bus.
    pub fn with_events(mut self, events: Bus) -> Self {
        self.events = events;
        self
    }

    /// Replaces the wall clock used to compute next run dates.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Adds a job.
    pub fn job(mut self, job: JobSpec) -> Self {
        self.jobs.push(job);
        self
    }

    /// Adds several jobs.
    pub fn jobs(mut self, jobs: impl IntoIterator<Item = JobSpec>) -> Self {
        self.jobs.extend(jobs);
        self
    }

    /// Checks job definitions: non-empty unique names and non-empty commands.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        let mut seen = std::collections::HashSet::new();
        for job in &self.jobs {
            if job.name.is_empty() {
                return Err(RuntimeError::configuration("job with an empty name"));
            }
            if job.entrypoint.command.is_empty() {
                return Err(RuntimeError::configuration(format!(
                    "job {:?} has no entrypoint command",
                    job.name
                )));
            }
            if !seen.insert(job.name.as_str()) {
                return Err(RuntimeError::configuration(format!(
                    "duplicate job name {:?}",
                    job.name
                )));
            }
        }
        Ok(())
    }

    /// Validates the jobs and starts the loop; it stops when `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> Result<SchedulerHandle, RuntimeError> {
        self.validate()?;
        let (tx, rx) = mpsc::channel(16);
        let join = tokio::spawn(self.run_loop(rx, cancel));
        Ok(SchedulerHandle { tx, join })
    }

    async fn run_loop(self, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        let Scheduler {
            jobs: specs,
            bus,
            launcher,
            events,
            clock,
        } = self;

        let mut jobs: HashMap<u64, ScheduledJob> = HashMap::with_capacity(specs.len());
        let mut entrypoints: HashMap<u64, WorkerSpec> = HashMap::with_capacity(specs.len());
        let mut timers: DelayQueue<u64> = DelayQueue::new();
        let mut running: JoinSet<RunOutcome> = JoinSet::new();

        for (idx, spec) in specs.into_iter().enumerate() {
            let id = idx as u64 + 1;
            let mut job = ScheduledJob::new(id, &spec);
            match job.reschedule(clock.now()) {
                Some(next) => {
                    tracing::info!(
                        target: TARGET,
                        job = id,
                        name = %job.name,
                        trigger = %job.trigger,
                        %next,
                        "job scheduled"
                    );
                    timers.insert(id, clock.until(next));
                }
                None => {
                    tracing::info!(
                        target: TARGET,
                        job = id,
                        name = %job.name,
                        "job has no runs, retired"
                    );
                    events.publish(Event::new(EventKind::JobRetired).with_job(id));
                }
            }
            entrypoints.insert(id, spec.entrypoint);
            jobs.insert(id, job);
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                Some(expired) = timers.next(), if !timers.is_empty() => {
                    let id = expired.into_inner();
                    let (Some(job), Some(entrypoint)) = (jobs.get_mut(&id), entrypoints.get(&id))
                    else {
                        continue;
                    };
                    job.next_run_date = None;
                    let started = LifecycleEvent::ProcessStarted { job_id: id };
                    if let Err(e) = bus.publish(&started).await {
                        tracing::warn!(target: TARGET, job = id, error = %e, "start not announced");
                    }
                    tracing::info!(target: TARGET, job = id, name = %job.name, "job run starting");
                    running.spawn(run_once(
                        id,
                        entrypoint.clone(),
                        Arc::clone(&launcher),
                        bus.clone(),
                        events.clone(),
                    ));
                }

                Some(done) = running.join_next(), if !running.is_empty() => {
                    let outcome = match done {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            tracing::error!(target: TARGET, error = %e, "job run task failed");
                            continue;
                        }
                    };
                    let Some(job) = jobs.get_mut(&outcome.id) else { continue };
                    job.runs += 1;
                    if outcome.pid.is_some() {
                        job.last_run_pid = outcome.pid;
                    }
                    match job.reschedule(clock.now()) {
                        Some(next) => {
                            tracing::debug!(target: TARGET, job = job.id, %next, "job rescheduled");
                            timers.insert(job.id, clock.until(next));
                            events.publish(
                                Event::new(EventKind::JobScheduled)
                                    .with_job(job.id)
                                    .with_reason(next.to_rfc3339()),
                            );
                            let ev = LifecycleEvent::ProcessScheduled {
                                job_id: job.id,
                                next_run_date: Some(next),
                            };
                            if let Err(e) = bus.publish(&ev).await {
                                tracing::warn!(
                                    target: TARGET,
                                    job = outcome.id,
                                    error = %e,
                                    "reschedule not announced"
                                );
                            }
                        }
                        None => {
                            tracing::info!(
                                target: TARGET,
                                job = job.id,
                                runs = job.runs,
                                "job retired"
                            );
                            events.publish(Event::new(EventKind::JobRetired).with_job(job.id));
                        }
                    }
                }

                Some(cmd) = rx.recv() => match cmd {
                    Command::Jobs(reply) => {
                        let mut snapshot: Vec<ScheduledJob> = jobs.values().cloned().collect();
                        snapshot.sort_by_key(|j| j.id);
                        let _ = reply.send(snapshot);
                    }
                },
            }
        }
        running.shutdown().await;
    }
}

async fn run_once(
    id: u64,
    entrypoint: WorkerSpec,
    launcher: Arc<dyn Launcher>,
    bus: MessageBus,
    events: Bus,
) -> RunOutcome {
    let launched = match launcher.launch(&entrypoint).await {
        Ok(launched) => launched,
        Err(e) => {
            tracing::error!(target: TARGET, job = id, error = %e, "job launch failed");
            events.publish(
                Event::new(EventKind::SpawnFailed)
                    .with_job(id)
                    .with_worker(entrypoint.name.as_str())
                    .with_reason(e.to_string()),
            );
            return RunOutcome { id, pid: None };
        }
    };

    let pid = launched.pid;
    events.publish(Event::new(EventKind::JobStarted).with_job(id).with_pid(pid));
    let peer = launched
        .channel
        .map(|channel| bus.attach(channel.reader, channel.writer));

    let code = launched.exit.await;
    if let Some(peer) = peer {
        bus.detach(peer);
    }
    match code {
        Some(0) => tracing::debug!(target: TARGET, job = id, pid, "job run finished"),
        other => {
            tracing::warn!(target: TARGET, job = id, pid, exit_code = ?other, "job run failed")
        }
    }
    RunOutcome { id, pid: Some(pid) }
}

/// Handle to a running [`Scheduler`].
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Snapshot of every job, ordered by id. Empty once the loop has stopped.
    pub async fn jobs(&self) -> Vec<ScheduledJob> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Jobs(reply)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Waits for the loop to stop (after its cancellation token fired).
    pub async fn join(self) {
        let _ = self.join.await;
    }
}
