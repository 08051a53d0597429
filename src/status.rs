//! # Worker and server status.
//!
//! - [`WorkerStatus`] is the per-worker state machine, mutated only by the supervisor loop.
//! - [`WorkerSnapshot`] / [`JobSnapshot`] are read-only copies handed to observers.
//! - [`ServerStatus`] is captured once at boot and never changes afterwards.
//!
//! ## Worker state machine
//! ```text
//!   SHUTDOWN ──► STARTING ──► RUNNING ──► STOPPING ──► SHUTDOWN
//!                   │                                     ▲
//!                   └──────── spawn failure / early exit ─┘
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a supervised worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// No live process.
    Shutdown,
    /// Process created, waiting for readiness.
    Starting,
    /// Process ready and serving.
    Running,
    /// Graceful stop requested, waiting for the process to exit.
    Stopping,
}

impl WorkerStatus {
    /// Returns `true` if `self → next` is an edge of the worker state machine.
    pub fn can_transition_to(self, next: WorkerStatus) -> bool {
        use WorkerStatus::*;
        matches!(
            (self, next),
            (Shutdown, Starting)
                | (Starting, Running)
                | (Starting, Shutdown)
                | (Running, Stopping)
                | (Running, Shutdown)
                | (Stopping, Shutdown)
        )
    }

    /// Returns `true` while an OS process is expected to exist for the worker.
    pub fn is_live(self) -> bool {
        !matches!(self, WorkerStatus::Shutdown)
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Shutdown => "shutdown",
            WorkerStatus::Starting => "starting",
            WorkerStatus::Running => "running",
            WorkerStatus::Stopping => "stopping",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    /// Worker name (unique within a supervisor).
    pub name: String,
    /// Current OS process id; `None` when [`WorkerStatus::Shutdown`].
    pub pid: Option<u32>,
    /// Current status.
    pub status: WorkerStatus,
    /// Restarts consumed from the budget since the last reset.
    pub restart_count: u32,
    /// Exit code of the previous process (`None` if killed by a signal or never exited).
    pub last_exit_code: Option<i32>,
    /// `true` once the restart budget is exhausted; no further spawns happen.
    pub failed: bool,
    /// Plugins the worker declared in its handshake.
    pub handled_by: Vec<String>,
}

/// Point-in-time view of one scheduled job, as tracked by the supervisor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Job id.
    pub id: u64,
    /// Number of runs announced so far.
    pub runs: u64,
    /// Next announced run; `None` before the first reschedule or once retired.
    pub next_run_date: Option<DateTime<Utc>>,
}

/// Process-wide boot record.
///
/// Built once when the supervisor boots and shared read-only afterwards; there are
/// no setters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    event_loop_kind: String,
    start_file_path: PathBuf,
    started_at: DateTime<Utc>,
}

impl ServerStatus {
    /// Captures the status of the current process.
    ///
    /// The event loop kind is derived from the ambient tokio runtime flavor.
    pub(crate) fn capture(start_file: Option<&Path>, started_at: DateTime<Utc>) -> Self {
        let event_loop_kind = match tokio::runtime::Handle::try_current() {
            Ok(handle) => match handle.runtime_flavor() {
                tokio::runtime::RuntimeFlavor::CurrentThread => "tokio-current-thread",
                tokio::runtime::RuntimeFlavor::MultiThread => "tokio-multi-thread",
                _ => "tokio",
            },
            Err(_) => "none",
        };
        let start_file_path = match start_file {
            Some(path) => path.to_path_buf(),
            None => std::env::current_exe()
                .ok()
                .or_else(|| std::env::args_os().next().map(PathBuf::from))
                .unwrap_or_default(),
        };
        Self {
            event_loop_kind: event_loop_kind.to_string(),
            start_file_path,
            started_at,
        }
    }

    /// Identifying name of the concurrency engine driving the supervisor.
    pub fn event_loop_kind(&self) -> &str {
        &self.event_loop_kind
    }

    /// Entry file of the supervisor process.
    pub fn start_file_path(&self) -> &Path {
        &self.start_file_path
    }

    /// Boot timestamp.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkerStatus::*;

    #[test]
    fn test_state_machine_cycle() {
        assert!(Shutdown.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Shutdown));
        assert!(Starting.can_transition_to(Shutdown));
    }

    #[test]
    fn test_state_machine_rejects_skips() {
        assert!(!Shutdown.can_transition_to(Running));
        assert!(!Stopping.can_transition_to(Running));
        assert!(!Starting.can_transition_to(Stopping));
        assert!(!Shutdown.can_transition_to(Stopping));
        assert!(!Running.can_transition_to(Starting));
    }

    #[test]
    fn test_only_shutdown_is_not_live() {
        assert!(!Shutdown.is_live());
        assert!(Starting.is_live() && Running.is_live() && Stopping.is_live());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_server_status_records_runtime_flavor() {
        let at = Utc::now();
        let status = ServerStatus::capture(Some(Path::new("/srv/app/main")), at);
        assert_eq!(status.event_loop_kind(), "tokio-current-thread");
        assert_eq!(status.start_file_path(), Path::new("/srv/app/main"));
        assert_eq!(status.started_at(), at);
    }
}
