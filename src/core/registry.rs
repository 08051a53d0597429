//! # Worker registry: per-worker slots owned by the event loop.
//!
//! Each [`WorkerSpec`] gets one [`Slot`] for the supervisor's lifetime. A slot
//! hosts a sequence of processes; every new process bumps the slot's
//! `generation`, which is how stale timers and exit notifications are recognised.
//!
//! ## Rules
//! - Only the event loop mutates slots; observers get [`WorkerSnapshot`]s.
//! - At most one live process per slot; `pid` is `None` exactly when SHUTDOWN
//!   (or while a launch is still in flight).
//! - Status changes go through [`Slot::transition`], which refuses edges outside
//!   the worker state machine.

use std::collections::HashMap;

use tokio::time::Instant;

use crate::ipc::PeerId;
use crate::process::ProcessControl;
use crate::status::{WorkerSnapshot, WorkerStatus};
use crate::worker::WorkerSpec;

pub(crate) struct Slot {
    pub(crate) spec: WorkerSpec,
    pub(crate) status: WorkerStatus,
    pub(crate) pid: Option<u32>,
    pub(crate) generation: u64,
    pub(crate) restart_count: u32,
    pub(crate) spawn_failures: u32,
    pub(crate) last_exit_code: Option<i32>,
    pub(crate) failed: bool,
    pub(crate) started_at: Option<Instant>,
    pub(crate) control: Option<Box<dyn ProcessControl>>,
    pub(crate) peer: Option<PeerId>,
    pub(crate) launching: bool,
    pub(crate) reload_pending: bool,
    pub(crate) killed: bool,
    pub(crate) handled_by: Vec<String>,
}

impl Slot {
    fn new(spec: WorkerSpec) -> Self {
        Self {
            spec,
            status: WorkerStatus::Shutdown,
            pid: None,
            generation: 0,
            restart_count: 0,
            spawn_failures: 0,
            last_exit_code: None,
            failed: false,
            started_at: None,
            control: None,
            peer: None,
            launching: false,
            reload_pending: false,
            killed: false,
            handled_by: Vec::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.spec.name
    }

    /// Moves to `next`; returns `false` (and logs) for an edge the state machine does not have.
    pub(crate) fn transition(&mut self, next: WorkerStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::error!(
                target: "procvisor::supervisor",
                worker = %self.spec.name,
                from = %self.status,
                to = %next,
                "invalid worker transition refused"
            );
            return false;
        }
        self.status = next;
        true
    }

    /// Sends the graceful stop signal, if a process is attached.
    pub(crate) fn terminate(&self) {
        if let Some(control) = &self.control {
            if let Err(e) = control.terminate() {
                tracing::warn!(
                    target: "procvisor::supervisor",
                    worker = %self.spec.name,
                    pid = ?self.pid,
                    error = %e,
                    "terminate failed"
                );
            }
        }
    }

    /// Force-kills the process once; later calls are no-ops.
    pub(crate) fn kill(&mut self) {
        if self.killed {
            return;
        }
        if let Some(control) = &self.control {
            self.killed = true;
            if let Err(e) = control.kill() {
                tracing::warn!(
                    target: "procvisor::supervisor",
                    worker = %self.spec.name,
                    pid = ?self.pid,
                    error = %e,
                    "kill failed"
                );
            }
        }
    }

    /// A process exists or is being created.
    pub(crate) fn is_live(&self) -> bool {
        self.launching || self.status.is_live()
    }

    pub(crate) fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            name: self.spec.name.clone(),
            pid: self.pid,
            status: self.status,
            restart_count: self.restart_count,
            last_exit_code: self.last_exit_code,
            failed: self.failed,
            handled_by: self.handled_by.clone(),
        }
    }
}

/// Slots in spec order plus a pid index.
pub(crate) struct Registry {
    slots: Vec<Slot>,
    by_pid: HashMap<u32, usize>,
}

impl Registry {
    pub(crate) fn new(specs: Vec<WorkerSpec>) -> Self {
        Self {
            slots: specs.into_iter().map(Slot::new).collect(),
            by_pid: HashMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn get(&self, idx: usize) -> Option<&Slot> {
        self.slots.get(idx)
    }

    pub(crate) fn get_mut(&mut self, idx: usize) -> Option<&mut Slot> {
        self.slots.get_mut(idx)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.slots.iter_mut()
    }

    pub(crate) fn find(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.spec.name == name)
    }

    pub(crate) fn by_pid(&self, pid: u32) -> Option<usize> {
        self.by_pid.get(&pid).copied()
    }

    /// Records the pid of a freshly spawned process.
    pub(crate) fn bind_pid(&mut self, idx: usize, pid: u32) {
        if let Some(slot) = self.slots.get_mut(idx) {
            slot.pid = Some(pid);
            self.by_pid.insert(pid, idx);
        }
    }

    /// Clears the pid of an exited process.
    pub(crate) fn release_pid(&mut self, idx: usize) {
        if let Some(pid) = self.slots.get_mut(idx).and_then(|s| s.pid.take()) {
            self.by_pid.remove(&pid);
        }
    }

    pub(crate) fn all_running(&self) -> bool {
        self.slots.iter().all(|s| s.status == WorkerStatus::Running)
    }

    pub(crate) fn all_down(&self) -> bool {
        self.slots.iter().all(|s| !s.is_live())
    }

    /// Names of slots that still have a process.
    pub(crate) fn live_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|s| s.is_live())
            .map(|s| s.spec.name.clone())
            .collect()
    }

    pub(crate) fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.slots.iter().map(Slot::snapshot).collect()
    }
}
