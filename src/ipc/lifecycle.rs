//! Lifecycle notifications exchanged between workers, the scheduler and the supervisor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::Message;

/// Closed set of lifecycle notifications.
///
/// Worker-originated variants carry the OS `pid` of the emitting process; the
/// supervisor routes them to the reload strategies of the worker owning that pid.
/// Job variants come from the [`Scheduler`](crate::Scheduler).
///
/// ```rust
/// use procvisor::LifecycleEvent;
///
/// let ev = LifecycleEvent::RequestCounterIncrease { pid: 42, delta: 1 };
/// let json = serde_json::to_string(&ev).unwrap();
/// assert_eq!(json, r#"{"event":"request_counter_increase","pid":42,"delta":1}"#);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A worker accepted a connection.
    ConnectionCreated {
        pid: u32,
        connection_id: u64,
        connection_info: Value,
    },
    /// A worker completed `delta` units of work.
    RequestCounterIncrease { pid: u32, delta: u64 },
    /// A worker is blocked on I/O.
    ProcessBlocked { pid: u32 },
    /// A worker is about to exit with `exit_code`.
    ProcessExit { pid: u32, exit_code: i32 },
    /// A worker caught an unhandled error but keeps running.
    ExceptionRaised { pid: u32, message: String },
    /// A job run finished; `next_run_date` is the freshly computed next run.
    ProcessScheduled {
        job_id: u64,
        next_run_date: Option<DateTime<Utc>>,
    },
    /// A job run is starting.
    ProcessStarted { job_id: u64 },
}

impl LifecycleEvent {
    /// Pid of the worker that emitted the event, `None` for job events.
    pub fn pid(&self) -> Option<u32> {
        match self {
            LifecycleEvent::ConnectionCreated { pid, .. }
            | LifecycleEvent::RequestCounterIncrease { pid, .. }
            | LifecycleEvent::ProcessBlocked { pid }
            | LifecycleEvent::ProcessExit { pid, .. }
            | LifecycleEvent::ExceptionRaised { pid, .. } => Some(*pid),
            LifecycleEvent::ProcessScheduled { .. } | LifecycleEvent::ProcessStarted { .. } => None,
        }
    }

    /// Stable snake_case name of the variant.
    pub fn as_label(&self) -> &'static str {
        match self {
            LifecycleEvent::ConnectionCreated { .. } => "connection_created",
            LifecycleEvent::RequestCounterIncrease { .. } => "request_counter_increase",
            LifecycleEvent::ProcessBlocked { .. } => "process_blocked",
            LifecycleEvent::ProcessExit { .. } => "process_exit",
            LifecycleEvent::ExceptionRaised { .. } => "exception_raised",
            LifecycleEvent::ProcessScheduled { .. } => "process_scheduled",
            LifecycleEvent::ProcessStarted { .. } => "process_started",
        }
    }
}

impl Message for LifecycleEvent {
    const KIND: &'static str = "lifecycle";
    type Reply = ();
}

/// Readiness request sent by a worker once it is able to serve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Pid of the worker process.
    pub pid: u32,
    /// Worker name as announced by the process.
    pub worker: String,
    /// Supervising plugins declared by the worker.
    pub handled_by: Vec<String>,
}

/// Supervisor acknowledgement of a [`Handshake`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeAck {
    /// Name the supervisor registered the process under.
    pub worker: String,
}

impl Message for Handshake {
    const KIND: &'static str = "handshake";
    type Reply = HandshakeAck;
}
