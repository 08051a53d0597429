//! # Restart policies for worker processes.
//!
//! [`RestartPolicy`] decides whether a worker that exited **on its own** is
//! respawned. Exits caused by a reload or by supervisor shutdown never consult it.
//!
//! - [`RestartPolicy::Never`] the worker runs once; an abnormal exit marks it failed.
//! - [`RestartPolicy::OnFailure`] only abnormal exits (non-zero code or signal) are respawned (default).
//! - [`RestartPolicy::Always`] every exit is respawned, clean ones included.
//!
//! Every respawn consumes one unit of the worker's restart budget
//! (`WorkerSpec::max_restarts`), whatever the policy.

/// Policy controlling whether a worker is respawned after it exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never respawn.
    Never,
    /// Respawn only after an abnormal exit (default).
    #[default]
    OnFailure,
    /// Respawn after every exit.
    Always,
}

impl RestartPolicy {
    /// Returns `true` if an exit with this outcome should be followed by a respawn.
    ///
    /// `abnormal` is `true` for a non-zero exit code or a signal-terminated process.
    pub fn wants_restart(self, abnormal: bool) -> bool {
        match self {
            RestartPolicy::Never => false,
            RestartPolicy::OnFailure => abnormal,
            RestartPolicy::Always => true,
        }
    }
}
