//! # LogWriter: events to `tracing`
//!
//! Forwards every [`Event`] to the `tracing` facade with structured fields, so
//! the embedding binary decides format and destination (the demos install a
//! `tracing-subscriber` fmt layer writing to stderr).
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO procvisor: worker starting worker="web" pid=4242 restarts=0
//! WARN procvisor: backoff scheduled worker="web" delay_ms=2000 attempt=1 exit_code=Some(1)
//! WARN procvisor: reload grace exceeded, killing worker="web" pid=4242 grace_ms=5000
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Subscriber that writes events through `tracing`.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let worker = e.worker.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::WorkerStarting => {
                tracing::info!(worker, pid = ?e.pid, restarts = ?e.attempt, "worker starting");
            }
            EventKind::WorkerRunning => {
                tracing::info!(worker, pid = ?e.pid, "worker running");
            }
            EventKind::WorkerExited => {
                tracing::info!(
                    worker,
                    pid = ?e.pid,
                    exit_code = ?e.exit_code,
                    reason = ?e.reason,
                    "worker exited"
                );
            }
            EventKind::BackoffScheduled => {
                tracing::warn!(
                    worker,
                    delay_ms = ?e.delay_ms,
                    attempt = ?e.attempt,
                    exit_code = ?e.exit_code,
                    "backoff scheduled"
                );
            }
            EventKind::WorkerFailed => {
                tracing::error!(
                    worker,
                    exit_code = ?e.exit_code,
                    reason = ?e.reason,
                    "worker failed permanently"
                );
            }
            EventKind::SpawnFailed => {
                tracing::error!(worker, reason = ?e.reason, "spawn failed");
            }
            EventKind::ReloadRequested => {
                tracing::info!(worker, pid = ?e.pid, grace_ms = ?e.timeout_ms, "reload requested");
            }
            EventKind::ReloadTimeout => {
                tracing::warn!(
                    worker,
                    pid = ?e.pid,
                    grace_ms = ?e.timeout_ms,
                    "reload grace exceeded, killing"
                );
            }
            EventKind::JobStarted => {
                tracing::info!(job = ?e.job, pid = ?e.pid, "job started");
            }
            EventKind::JobScheduled => {
                tracing::debug!(job = ?e.job, next = ?e.reason, "job scheduled");
            }
            EventKind::JobRetired => {
                tracing::info!(job = ?e.job, "job retired");
            }
            EventKind::ShutdownRequested => tracing::info!("shutdown requested"),
            EventKind::AllStoppedWithin => tracing::info!("all workers stopped within grace"),
            EventKind::GraceExceeded => {
                tracing::warn!(
                    grace_ms = ?e.timeout_ms,
                    stuck = ?e.reason,
                    "shutdown grace exceeded"
                );
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(subscriber = worker, reason = ?e.reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(subscriber = worker, info = ?e.reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
