//! Restart and respawn policies.
//!
//! This module groups the knobs that control **whether** a worker process is
//! respawned after it exits and **how long** the supervisor waits before doing so.
//!
//! ## Contents
//! - [`RestartPolicy`] which exits are restarted (never / on-failure / always)
//! - [`BackoffPolicy`] how respawn delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid synchronized respawns
//!
//! ## Quick wiring
//! ```text
//! WorkerSpec { restart, backoff, max_restarts, reset_after }
//!      └─► core::event_loop on unexpected exit:
//!           - uptime >= reset_after      → restart_count = 0
//!           - restart decides continue / finish
//!           - restart_count >= max       → worker permanently failed
//!           - backoff.next(restart_count) → delay before the respawn
//! ```
//!
//! ## Defaults
//! - `RestartPolicy::OnFailure`.
//! - `BackoffPolicy::default()` → first=1s, factor=2.0, max=30s, jitter=None.

mod backoff;
mod jitter;
mod restart;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use restart::RestartPolicy;
