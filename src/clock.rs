//! # Wall-clock source for scheduling.
//!
//! Triggers work on wall-clock dates ([`DateTime<Utc>`]) while all waiting is done
//! on tokio timers. [`Clock`] bridges the two:
//!
//! - [`Clock::system`] reads the OS wall clock on every call.
//! - [`Clock::monotonic`] anchors a wall-clock reading to a tokio [`Instant`] and
//!   advances with tokio time. Under `tokio::time::pause()` it moves only when the
//!   runtime clock moves, which makes scheduling deterministic in tests.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of "now" for the scheduler and status records.
#[derive(Clone, Copy, Debug)]
pub enum Clock {
    /// OS wall clock.
    System,
    /// Wall clock anchored at a tokio instant.
    Monotonic {
        /// Wall-clock reading taken at `instant`.
        wall: DateTime<Utc>,
        /// Tokio instant of the anchor.
        instant: Instant,
    },
}

impl Clock {
    /// Returns the OS wall clock.
    pub fn system() -> Self {
        Clock::System
    }

    /// Returns a clock anchored at the current wall-clock time that advances with tokio time.
    pub fn monotonic() -> Self {
        Clock::Monotonic {
            wall: Utc::now(),
            instant: Instant::now(),
        }
    }

    /// Returns a clock anchored at `wall` that advances with tokio time.
    pub fn anchored_at(wall: DateTime<Utc>) -> Self {
        Clock::Monotonic {
            wall,
            instant: Instant::now(),
        }
    }

    /// Current wall-clock time according to this clock.
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Monotonic { wall, instant } => {
                let elapsed = Instant::now().saturating_duration_since(*instant);
                match chrono::Duration::from_std(elapsed) {
                    Ok(d) => *wall + d,
                    Err(_) => *wall,
                }
            }
        }
    }

    /// Time left until `at`, zero if `at` is already in the past.
    pub fn until(&self, at: DateTime<Utc>) -> std::time::Duration {
        (at - self.now()).to_std().unwrap_or_default()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::System
    }
}
