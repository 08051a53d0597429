//! # Worker specification.
//!
//! [`WorkerSpec`] bundles everything the supervisor needs to run one worker:
//! the command line, how readiness is detected, the restart budget and the
//! reload strategies.
//!
//! ## Constructors
//! - [`WorkerSpec::with_defaults`] inherits every policy from [`SupervisorConfig`].
//! - [`WorkerSpec::builder`] overrides selected fields, falling back to the config.
//!
//! ```rust
//! use std::time::Duration;
//! use procvisor::{EachRequest, Periodic, RestartPolicy, SupervisorConfig, WorkerSpec};
//!
//! let cfg = SupervisorConfig::default();
//! let spec = WorkerSpec::builder("web", "/usr/local/bin/web-worker")
//!     .args(["--port", "8080"])
//!     .restart(RestartPolicy::Always)
//!     .strategy(EachRequest)
//!     .strategy(Periodic::new(Duration::from_secs(300)))
//!     .build(&cfg);
//!
//! assert_eq!(spec.max_restarts, cfg.max_restarts);
//! assert_eq!(spec.strategies.len(), 2);
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::core::SupervisorConfig;
use crate::policies::{BackoffPolicy, RestartPolicy};
use crate::reload::ReloadStrategy;

/// How the supervisor decides a freshly spawned worker is RUNNING.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Readiness {
    /// RUNNING once the worker sends its [`Handshake`](crate::Handshake).
    #[default]
    Handshake,
    /// RUNNING as soon as the process exists; no IPC channel is set up.
    Spawned,
}

/// Specification of one supervised worker.
#[derive(Clone, Debug)]
pub struct WorkerSpec {
    /// Unique worker name.
    pub name: String,
    /// Program to execute.
    pub command: String,
    /// Program arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Readiness detection.
    pub readiness: Readiness,
    /// Which exits are restarted.
    pub restart: RestartPolicy,
    /// Respawn delays.
    pub backoff: BackoffPolicy,
    /// Restarts allowed before the worker is marked permanently failed.
    pub max_restarts: u32,
    /// Uptime after which the restart count is reset.
    pub reset_after: Duration,
    /// Default grace of a reload before the process is killed.
    pub reload_grace: Duration,
    /// Reload strategies evaluated for this worker.
    pub strategies: Vec<Arc<dyn ReloadStrategy>>,
}

impl WorkerSpec {
    /// Creates a spec inheriting every policy from `cfg`, with no reload strategy.
    pub fn with_defaults(
        name: impl Into<String>,
        command: impl Into<String>,
        cfg: &SupervisorConfig,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            readiness: Readiness::default(),
            restart: cfg.restart,
            backoff: cfg.backoff,
            max_restarts: cfg.max_restarts,
            reset_after: cfg.reset_after,
            reload_grace: cfg.reload_grace,
            strategies: Vec::new(),
        }
    }

    /// Starts a builder.
    pub fn builder(name: impl Into<String>, command: impl Into<String>) -> WorkerSpecBuilder {
        WorkerSpecBuilder {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            readiness: Readiness::default(),
            restart: None,
            backoff: None,
            max_restarts: None,
            reset_after: None,
            reload_grace: None,
            strategies: Vec::new(),
        }
    }

    /// Timer periods per strategy index; a composite yields one entry per child period.
    pub(crate) fn timer_intervals(&self) -> impl Iterator<Item = (usize, Duration)> + '_ {
        self.strategies
            .iter()
            .enumerate()
            .flat_map(|(i, s)| s.periods().into_iter().map(move |d| (i, d)))
    }
}

/// Builder for [`WorkerSpec`]; unset policies come from the [`SupervisorConfig`].
#[derive(Clone, Debug)]
pub struct WorkerSpecBuilder {
    name: String,
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    readiness: Readiness,
    restart: Option<RestartPolicy>,
    backoff: Option<BackoffPolicy>,
    max_restarts: Option<u32>,
    reset_after: Option<Duration>,
    reload_grace: Option<Duration>,
    strategies: Vec<Arc<dyn ReloadStrategy>>,
}

impl WorkerSpecBuilder {
    /// Appends one command-line argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable for the child, on top of the inherited ones.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = Some(restart);
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn max_restarts(mut self, n: u32) -> Self {
        self.max_restarts = Some(n);
        self
    }

    pub fn reset_after(mut self, uptime: Duration) -> Self {
        self.reset_after = Some(uptime);
        self
    }

    pub fn reload_grace(mut self, grace: Duration) -> Self {
        self.reload_grace = Some(grace);
        self
    }

    /// Adds a reload strategy.
    pub fn strategy(mut self, strategy: impl ReloadStrategy) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    /// Adds a shared reload strategy.
    pub fn strategy_arc(mut self, strategy: Arc<dyn ReloadStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn build(self, cfg: &SupervisorConfig) -> WorkerSpec {
        WorkerSpec {
            name: self.name,
            command: self.command,
            args: self.args,
            env: self.env,
            readiness: self.readiness,
            restart: self.restart.unwrap_or(cfg.restart),
            backoff: self.backoff.unwrap_or(cfg.backoff),
            max_restarts: self.max_restarts.unwrap_or(cfg.max_restarts),
            reset_after: self.reset_after.unwrap_or(cfg.reset_after),
            reload_grace: self.reload_grace.unwrap_or(cfg.reload_grace),
            strategies: self.strategies,
        }
    }
}
