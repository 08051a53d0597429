//! # Jitter for respawn delays.
//!
//! When many workers crash together (shared dependency down, host hiccup) their
//! respawns line up. [`JitterPolicy`] spreads them out.
//!
//! - [`JitterPolicy::None`] — exact delay.
//! - [`JitterPolicy::Full`] — uniform in `[0, delay]`.
//! - [`JitterPolicy::Equal`] — `delay/2 + uniform[0, delay/2]`.
//! - [`JitterPolicy::Decorrelated`] — uniform in `[floor, min(3 × delay, max)]`.

use rand::Rng;
use std::time::Duration;

/// Randomization applied to a respawn delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Use the delay as computed.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Half the delay plus uniform in `[0, delay/2]`.
    Equal,
    /// Uniform in `[floor, min(3 × delay, max)]`; see [`apply_decorrelated`](Self::apply_decorrelated).
    Decorrelated,
}

impl JitterPolicy {
    /// Applies jitter to `delay`.
    ///
    /// `Decorrelated` needs more context and returns `delay` unchanged here.
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = millis(delay);
        if ms == 0 {
            return delay;
        }
        match self {
            JitterPolicy::None | JitterPolicy::Decorrelated => delay,
            JitterPolicy::Full => Duration::from_millis(rand::rng().random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                Duration::from_millis(half + rand::rng().random_range(0..=half))
            }
        }
    }

    /// Decorrelated jitter: uniform in `[floor, min(prev × 3, max)]`.
    ///
    /// Falls back to [`apply`](Self::apply) for the other variants.
    pub fn apply_decorrelated(&self, floor: Duration, prev: Duration, max: Duration) -> Duration {
        if !matches!(self, JitterPolicy::Decorrelated) {
            return self.apply(prev);
        }
        let floor_ms = millis(floor);
        let upper = millis(prev).saturating_mul(3).min(millis(max)).max(floor_ms);
        if floor_ms >= upper {
            return floor;
        }
        Duration::from_millis(rand::rng().random_range(floor_ms..=upper))
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
