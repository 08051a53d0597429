//! # Observability events emitted by the supervisor and scheduler.
//!
//! [`EventKind`] groups events into:
//! - **Worker lifecycle**: starting, running, exited, backoff, failed, spawn failures
//! - **Reload**: reload requested, grace period exceeded
//! - **Jobs**: started, rescheduled, retired
//! - **Shutdown**: requested, completed within grace, grace exceeded
//! - **Subscribers**: overflow and panic reports
//!
//! [`Event`] carries optional metadata depending on the kind. Every event gets a
//! process-wide monotonically increasing `seq`.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use procvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::BackoffScheduled)
//!     .with_worker("web")
//!     .with_pid(4242)
//!     .with_exit_code(Some(1))
//!     .with_delay(Duration::from_secs(2));
//!
//! assert_eq!(ev.worker.as_deref(), Some("web"));
//! assert_eq!(ev.delay_ms, Some(2000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of observability events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Worker lifecycle ===
    /// A worker process was created (`worker`, `pid`, `attempt` = restart count).
    WorkerStarting,
    /// A worker became ready (`worker`, `pid`).
    WorkerRunning,
    /// A worker process exited (`worker`, `pid`, `exit_code`, `reason`).
    WorkerExited,
    /// A respawn was scheduled (`worker`, `delay_ms`, `attempt`, `exit_code`).
    BackoffScheduled,
    /// The restart budget is exhausted; the worker stays down (`worker`, `exit_code`, `reason`).
    WorkerFailed,
    /// The launcher could not create a process (`worker`, `reason`).
    SpawnFailed,

    // === Reload ===
    /// Graceful stop sent as part of a reload (`worker`, `pid`, `timeout_ms` = grace).
    ReloadRequested,
    /// Grace period elapsed; the process was force-killed (`worker`, `pid`, `timeout_ms`).
    ReloadTimeout,

    // === Jobs ===
    /// A scheduled job run started (`job`, `pid`).
    JobStarted,
    /// A job was rescheduled after a run (`job`, `reason` = next run date).
    JobScheduled,
    /// A job's trigger reported no further runs (`job`).
    JobRetired,

    // === Shutdown ===
    /// Supervisor shutdown requested.
    ShutdownRequested,
    /// All workers exited within the shutdown grace period.
    AllStoppedWithin,
    /// Shutdown grace period exceeded; stragglers were killed.
    GraceExceeded,

    // === Subscribers ===
    /// Subscriber panicked while processing an event (`worker` = subscriber name).
    SubscriberPanicked,
    /// Subscriber queue rejected an event (`worker` = subscriber name, `reason`).
    SubscriberOverflow,
}

/// Observability event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Worker (or subscriber) name, if applicable.
    pub worker: Option<Arc<str>>,
    /// OS process id, if applicable.
    pub pid: Option<u32>,
    /// Process exit code; `None` inside the option means "killed by a signal".
    pub exit_code: Option<Option<i32>>,
    /// Scheduled job id.
    pub job: Option<u64>,
    /// Restart count or attempt number.
    pub attempt: Option<u32>,
    /// Delay before the next action in milliseconds.
    pub delay_ms: Option<u32>,
    /// Grace or timeout in milliseconds.
    pub timeout_ms: Option<u32>,
    /// Human-readable detail.
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            worker: None,
            pid: None,
            exit_code: None,
            job: None,
            attempt: None,
            delay_ms: None,
            timeout_ms: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_worker(mut self, worker: impl Into<Arc<str>>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    #[inline]
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = Some(code);
        self
    }

    #[inline]
    pub fn with_job(mut self, job: u64) -> Self {
        self.job = Some(job);
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds, saturating).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a grace/timeout (stored as milliseconds, saturating).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_worker(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_worker(subscriber)
            .with_reason(info)
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}
