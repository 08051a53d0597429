use std::sync::Arc;

use super::{config::SupervisorConfig, supervisor::Supervisor};
use crate::clock::Clock;
use crate::process::{CommandLauncher, Launcher};
use crate::scheduler::JobSpec;
use crate::subscribers::Subscribe;

/// Builder for constructing a [`Supervisor`] with optional features.
pub struct SupervisorBuilder {
    cfg: SupervisorConfig,
    launcher: Arc<dyn Launcher>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    jobs: Vec<JobSpec>,
    clock: Clock,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: SupervisorConfig) -> Self {
        Self {
            cfg,
            launcher: Arc::new(CommandLauncher),
            subscribers: Vec::new(),
            jobs: Vec::new(),
            clock: Clock::default(),
        }
    }

    /// Replaces the process launcher (defaults to [`CommandLauncher`]).
    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (worker lifecycle, reloads, job runs)
    /// through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Scheduled jobs started once the worker pool is RUNNING.
    pub fn with_jobs(mut self, jobs: impl IntoIterator<Item = JobSpec>) -> Self {
        self.jobs.extend(jobs);
        self
    }

    /// Wall clock used for job triggers and the boot timestamp.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the Supervisor; nothing runs until [`Supervisor::start`] or [`Supervisor::run`].
    pub fn build(self) -> Supervisor {
        Supervisor::new_internal(
            self.cfg,
            self.launcher,
            self.subscribers,
            self.jobs,
            self.clock,
        )
    }
}
