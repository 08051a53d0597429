//! # Trigger-driven job scheduler.
//!
//! Each job is bound to a [`Trigger`]. The [`Scheduler`] keeps one timer per job
//! and never polls on a fixed tick:
//!
//! ```text
//! next = trigger.next_run_date(now)
//!   ├─ None    → job retired (no error, no further runs)
//!   └─ Some(t) → sleep until t
//!                  ├─► publish ProcessStarted { job_id }
//!                  ├─► launch the job's worker entrypoint, wait for exit
//!                  ├─► next = trigger.next_run_date(now)      (recomputed from the trigger)
//!                  └─► publish ProcessScheduled { job_id, next } and loop
//! ```
//!
//! ## Rules
//! - Reschedules come only from the scheduler's own loop; re-delivered
//!   `ProcessScheduled` events never cause extra runs.
//! - A job never overlaps itself: the next date is computed after the run ends.
//! - Retirement does not publish `ProcessScheduled`.

mod job;
mod runner;
mod trigger;

pub use job::{JobSpec, ScheduledJob};
pub use runner::{Scheduler, SchedulerHandle};
pub use trigger::{CronTrigger, IntervalTrigger, OnceTrigger, Trigger};
