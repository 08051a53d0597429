//! # Triggers: pure "when is the next run" functions.
//!
//! A [`Trigger`] maps "now" to the next run date or `None` when it is done.
//!
//! ## Contract
//! - Pure: the same `now` always yields the same answer.
//! - Strictly in the future: a returned date is always `> now`.
//! - Monotonic: for `t1 <= t2`, `next(t1) <= next(t2)` whenever both exist.
//! - Renders to a human-readable string for logs.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::RuntimeError;

/// Computes the next run date of a job.
pub trait Trigger: fmt::Display + fmt::Debug + Send + Sync + 'static {
    /// Next run strictly after `now`, or `None` if the job has no further runs.
    fn next_run_date(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Cron expression trigger (seconds precision, `sec min hour dom mon dow [year]`).
#[derive(Clone, Debug)]
pub struct CronTrigger {
    expression: String,
    schedule: cron::Schedule,
    end: Option<DateTime<Utc>>,
}

impl CronTrigger {
    /// Parses a cron expression.
    ///
    /// ```rust
    /// use procvisor::{CronTrigger, Trigger};
    /// use chrono::{TimeZone, Utc};
    ///
    /// let every_minute = CronTrigger::parse("0 * * * * *").unwrap();
    /// let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 30).unwrap();
    /// assert_eq!(
    ///     every_minute.next_run_date(now),
    ///     Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 1, 0).unwrap())
    /// );
    /// ```
    pub fn parse(expression: &str) -> Result<Self, RuntimeError> {
        let schedule = cron::Schedule::from_str(expression).map_err(|e| {
            RuntimeError::configuration(format!("invalid cron expression {expression:?}: {e}"))
        })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
            end: None,
        })
    }

    /// Stops producing runs after `end` (inclusive).
    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }
}

impl Trigger for CronTrigger {
    fn next_run_date(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let next = self.schedule.after(&now).next()?;
        match self.end {
            Some(end) if next > end => None,
            _ => Some(next),
        }
    }
}

impl fmt::Display for CronTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "cron({}) until {}", self.expression, end.to_rfc3339()),
            None => write!(f, "cron({})", self.expression),
        }
    }
}

/// Fixed-interval trigger.
///
/// Without an anchor the next run is `now + every`. With an anchor runs sit on
/// the grid `anchor + k·every`, so execution time never shifts later runs.
#[derive(Clone, Copy, Debug)]
pub struct IntervalTrigger {
    every: chrono::Duration,
    anchor: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
}

impl IntervalTrigger {
    /// Runs every `every` (raised to at least 1ms).
    pub fn every(every: Duration) -> Self {
        let every = chrono::Duration::from_std(every.max(Duration::from_millis(1)))
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        Self {
            every,
            anchor: None,
            until: None,
        }
    }

    /// Aligns runs to `anchor + k·every`.
    pub fn starting_at(mut self, anchor: DateTime<Utc>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    /// No runs after `until` (inclusive).
    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }
}

impl Trigger for IntervalTrigger {
    fn next_run_date(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let next = match self.anchor {
            Some(anchor) if now < anchor => anchor,
            Some(anchor) => {
                let step = self.every.num_milliseconds().max(1);
                let elapsed = (now - anchor).num_milliseconds();
                let k = elapsed / step + 1;
                anchor.checked_add_signed(chrono::Duration::milliseconds(k.checked_mul(step)?))?
            }
            None => now.checked_add_signed(self.every)?,
        };
        match self.until {
            Some(until) if next > until => None,
            _ => Some(next),
        }
    }
}

impl fmt::Display for IntervalTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "every {}ms", self.every.num_milliseconds())?;
        if let Some(anchor) = self.anchor {
            write!(f, " from {}", anchor.to_rfc3339())?;
        }
        if let Some(until) = self.until {
            write!(f, " until {}", until.to_rfc3339())?;
        }
        Ok(())
    }
}

/// Single run at a fixed instant.
#[derive(Clone, Copy, Debug)]
pub struct OnceTrigger {
    at: DateTime<Utc>,
}

impl OnceTrigger {
    /// Runs once at `at`; retires without running if `at` has already passed.
    pub fn at(at: DateTime<Utc>) -> Self {
        Self { at }
    }
}

impl Trigger for OnceTrigger {
    fn next_run_date(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (now < self.at).then_some(self.at)
    }
}

impl fmt::Display for OnceTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "once at {}", self.at.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_invalid_cron_is_configuration_error() {
        let err = CronTrigger::parse("not a cron").unwrap_err();
        assert_eq!(err.as_label(), "runtime_configuration");
    }

    #[test]
    fn test_cron_end_date_retires() {
        let trigger = CronTrigger::parse("0 0 * * * *")
            .unwrap()
            .until(t0() + chrono::Duration::minutes(90));
        assert_eq!(
            trigger.next_run_date(t0()),
            Some(t0() + chrono::Duration::hours(1))
        );
        assert_eq!(trigger.next_run_date(t0() + chrono::Duration::hours(1)), None);
        assert!(trigger.to_string().starts_with("cron(0 0 * * * *) until"));
    }

    #[test]
    fn test_interval_until() {
        let trigger = IntervalTrigger::every(Duration::from_secs(60))
            .until(t0() + chrono::Duration::seconds(150));
        assert_eq!(
            trigger.next_run_date(t0()),
            Some(t0() + chrono::Duration::seconds(60))
        );
        assert_eq!(
            trigger.next_run_date(t0() + chrono::Duration::seconds(60)),
            Some(t0() + chrono::Duration::seconds(120))
        );
        assert_eq!(trigger.next_run_date(t0() + chrono::Duration::seconds(120)), None);
    }

    #[test]
    fn test_anchored_interval_stays_on_grid() {
        let trigger = IntervalTrigger::every(Duration::from_secs(10)).starting_at(t0());
        assert_eq!(
            trigger.next_run_date(t0() + chrono::Duration::milliseconds(13_500)),
            Some(t0() + chrono::Duration::seconds(20))
        );
        assert_eq!(
            trigger.next_run_date(t0()),
            Some(t0() + chrono::Duration::seconds(10))
        );
        assert_eq!(
            trigger.next_run_date(t0() - chrono::Duration::seconds(5)),
            Some(t0())
        );
    }

    #[test]
    fn test_once_runs_once() {
        let trigger = OnceTrigger::at(t0());
        assert_eq!(trigger.next_run_date(t0() - chrono::Duration::seconds(1)), Some(t0()));
        assert_eq!(trigger.next_run_date(t0()), None);
    }

    fn triggers() -> Vec<Box<dyn Trigger>> {
        vec![
            Box::new(CronTrigger::parse("*/7 * * * * *").unwrap()),
            Box::new(
                CronTrigger::parse("0 */5 * * * *")
                    .unwrap()
                    .until(t0() + chrono::Duration::hours(1)),
            ),
            Box::new(IntervalTrigger::every(Duration::from_secs(45))),
            Box::new(IntervalTrigger::every(Duration::from_secs(30)).starting_at(t0())),
            Box::new(OnceTrigger::at(t0() + chrono::Duration::minutes(30))),
        ]
    }

    proptest! {
        #[test]
        fn prop_next_run_is_future_and_monotonic(
            mut offsets in proptest::collection::vec(0i64..7_200_000, 2..16)
        ) {
            offsets.sort_unstable();
            for trigger in triggers() {
                let mut previous: Option<DateTime<Utc>> = None;
                for ms in &offsets {
                    let now = t0() + chrono::Duration::milliseconds(*ms);
                    if let Some(next) = trigger.next_run_date(now) {
                        prop_assert!(next > now, "{} returned {} for now {}", trigger, next, now);
                        if let Some(prev) = previous {
                            prop_assert!(next >= prev, "{} went backwards", trigger);
                        }
                        previous = Some(next);
                    }
                }
            }
        }

        #[test]
        fn prop_triggers_are_pure(ms in 0i64..7_200_000) {
            let now = t0() + chrono::Duration::milliseconds(ms);
            for trigger in triggers() {
                prop_assert_eq!(trigger.next_run_date(now), trigger.next_run_date(now));
            }
        }
    }
}
