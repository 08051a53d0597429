//! # Global supervisor configuration.
//!
//! [`SupervisorConfig`] is used in two ways:
//! 1. **Supervisor creation**: `Supervisor::builder(config)`
//! 2. **WorkerSpec defaults**: `WorkerSpec::with_defaults(name, command, &config)`
//!
//! ## Sentinel values
//! - `ready_timeout = 0s` → boot waits for readiness forever
//! - `grace = 0s` → shutdown kills immediately

use std::path::PathBuf;
use std::time::Duration;

use crate::policies::{BackoffPolicy, RestartPolicy};

/// Global configuration for the supervisor runtime.
///
/// All fields are public; prefer the helper accessors over sprinkling sentinel
/// checks across the codebase.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Shutdown grace: how long workers get to exit after SIGTERM before SIGKILL.
    pub grace: Duration,

    /// Default reload grace for workers (overridable per worker and per request).
    pub reload_grace: Duration,

    /// Capacity of the observability event bus ring buffer (min 1).
    pub bus_capacity: usize,

    /// How many times boot retries a failing spawn before giving up with
    /// `RuntimeError::Fatal` (min 1).
    pub spawn_attempts: u32,

    /// How long boot waits for every worker to become RUNNING (`0s` = forever).
    pub ready_timeout: Duration,

    /// Upper bound of one IPC frame body in bytes.
    pub max_frame_length: usize,

    /// Default restart policy for workers.
    pub restart: RestartPolicy,

    /// Default respawn backoff for workers.
    pub backoff: BackoffPolicy,

    /// Default restart budget per worker.
    pub max_restarts: u32,

    /// Uptime after which a worker's restart count is reset.
    pub reset_after: Duration,

    /// Overrides the entry file recorded in [`ServerStatus`](crate::ServerStatus).
    pub start_file: Option<PathBuf>,
}

impl SupervisorConfig {
    /// Boot readiness deadline as an `Option` (`None` → wait forever).
    #[inline]
    pub fn ready_deadline(&self) -> Option<Duration> {
        if self.ready_timeout.is_zero() {
            None
        } else {
            Some(self.ready_timeout)
        }
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Spawn attempts clamped to a minimum of 1.
    #[inline]
    pub fn spawn_attempts_clamped(&self) -> u32 {
        self.spawn_attempts.max(1)
    }
}

impl Default for SupervisorConfig {
    /// - `grace = 60s`, `reload_grace = 30s`
    /// - `bus_capacity = 1024`, `max_frame_length = 8 MiB`
    /// - `spawn_attempts = 3`, `ready_timeout = 30s`
    /// - `restart = OnFailure`, `backoff = 1s ×2 up to 30s`
    /// - `max_restarts = 5`, `reset_after = 60s`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            reload_grace: Duration::from_secs(30),
            bus_capacity: 1024,
            spawn_attempts: 3,
            ready_timeout: Duration::from_secs(30),
            max_frame_length: crate::ipc::DEFAULT_MAX_FRAME_LENGTH,
            restart: RestartPolicy::default(),
            backoff: BackoffPolicy::default(),
            max_restarts: 5,
            reset_after: Duration::from_secs(60),
            start_file: None,
        }
    }
}
