use std::fmt;
use std::time::Duration;

use crate::ipc::LifecycleEvent;

/// Input of a reload decision.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReloadEvent<'a> {
    /// Periodic evaluation with no event attached; `elapsed` is how long the
    /// worker has been RUNNING.
    Timer { elapsed: Duration },
    /// A lifecycle event emitted by the worker.
    Lifecycle(&'a LifecycleEvent),
}

/// Decides whether a worker must be reloaded.
///
/// Implementations must be pure: no side effects, same answer for the same input.
pub trait ReloadStrategy: fmt::Debug + Send + Sync + 'static {
    /// Returns `true` if the worker must be reloaded.
    fn should_reload(&self, event: &ReloadEvent<'_>) -> bool;

    /// Period of [`ReloadEvent::Timer`] evaluations; `None` disables them.
    fn interval(&self) -> Option<Duration> {
        None
    }

    /// Every period this strategy needs a timer evaluation at.
    ///
    /// Defaults to [`interval`](Self::interval). Composites return the periods of
    /// all their children so each child is evaluated when its own period is due.
    fn periods(&self) -> Vec<Duration> {
        self.interval().into_iter().collect()
    }
}

/// Reloads on every evaluation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Always;

impl ReloadStrategy for Always {
    fn should_reload(&self, _event: &ReloadEvent<'_>) -> bool {
        true
    }
}

/// Never reloads.
#[derive(Clone, Copy, Debug, Default)]
pub struct Never;

impl ReloadStrategy for Never {
    fn should_reload(&self, _event: &ReloadEvent<'_>) -> bool {
        false
    }
}

/// Reloads after every completed unit of work.
#[derive(Clone, Copy, Debug, Default)]
pub struct EachRequest;

impl ReloadStrategy for EachRequest {
    fn should_reload(&self, event: &ReloadEvent<'_>) -> bool {
        matches!(
            event,
            ReloadEvent::Lifecycle(LifecycleEvent::RequestCounterIncrease { .. })
        )
    }
}

/// Reloads after the worker reports an unhandled error.
#[derive(Clone, Copy, Debug, Default)]
pub struct OnException;

impl ReloadStrategy for OnException {
    fn should_reload(&self, event: &ReloadEvent<'_>) -> bool {
        matches!(
            event,
            ReloadEvent::Lifecycle(LifecycleEvent::ExceptionRaised { .. })
        )
    }
}

/// Reloads when the worker reports it is blocked.
#[derive(Clone, Copy, Debug, Default)]
pub struct OnBlocked;

impl ReloadStrategy for OnBlocked {
    fn should_reload(&self, event: &ReloadEvent<'_>) -> bool {
        matches!(
            event,
            ReloadEvent::Lifecycle(LifecycleEvent::ProcessBlocked { .. })
        )
    }
}

/// Reloads once the worker has been RUNNING for `every`, independent of traffic.
///
/// The period restarts each time the worker becomes RUNNING.
#[derive(Clone, Copy, Debug)]
pub struct Periodic {
    every: Duration,
}

impl Periodic {
    /// Creates a periodic strategy; zero periods are raised to 1ms.
    pub fn new(every: Duration) -> Self {
        Self {
            every: every.max(Duration::from_millis(1)),
        }
    }

    /// Convenience constructor in whole seconds.
    pub fn every_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }
}

impl ReloadStrategy for Periodic {
    fn should_reload(&self, event: &ReloadEvent<'_>) -> bool {
        matches!(event, ReloadEvent::Timer { elapsed } if *elapsed >= self.every)
    }

    fn interval(&self) -> Option<Duration> {
        Some(self.every)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_request_only_reacts_to_request_completion() {
        let s = EachRequest;
        let req = LifecycleEvent::RequestCounterIncrease { pid: 1, delta: 1 };
        let blocked = LifecycleEvent::ProcessBlocked { pid: 1 };
        assert!(s.should_reload(&ReloadEvent::Lifecycle(&req)));
        assert!(!s.should_reload(&ReloadEvent::Lifecycle(&blocked)));
        assert!(!s.should_reload(&timer(60)));
    }

    fn timer(secs: u64) -> ReloadEvent<'static> {
        ReloadEvent::Timer {
            elapsed: Duration::from_secs(secs),
        }
    }

    #[test]
    fn test_periodic_reacts_to_due_timer_only() {
        let s = Periodic::every_secs(30);
        let req = LifecycleEvent::RequestCounterIncrease { pid: 1, delta: 1 };
        assert!(!s.should_reload(&timer(29)));
        assert!(s.should_reload(&timer(30)));
        assert!(s.should_reload(&timer(45)));
        assert!(!s.should_reload(&ReloadEvent::Lifecycle(&req)));
        assert_eq!(s.interval(), Some(Duration::from_secs(30)));
        assert_eq!(s.periods(), vec![Duration::from_secs(30)]);
        assert!(EachRequest.periods().is_empty());
    }

    #[test]
    fn test_on_exception() {
        let ev = LifecycleEvent::ExceptionRaised {
            pid: 3,
            message: "division by zero".into(),
        };
        assert!(OnException.should_reload(&ReloadEvent::Lifecycle(&ev)));
        assert!(!OnBlocked.should_reload(&ReloadEvent::Lifecycle(&ev)));
        assert!(Always.should_reload(&timer(0)));
        assert!(!Never.should_reload(&ReloadEvent::Lifecycle(&ev)));
    }
}
