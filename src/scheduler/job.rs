use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::trigger::Trigger;
use crate::worker::WorkerSpec;

/// Definition of a scheduled job: what to run and when.
#[derive(Clone, Debug)]
pub struct JobSpec {
    /// Job name (unique within a scheduler).
    pub name: String,
    /// Entrypoint launched on every run; restart and reload settings are ignored.
    pub entrypoint: WorkerSpec,
    /// When to run.
    pub trigger: Arc<dyn Trigger>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, entrypoint: WorkerSpec, trigger: impl Trigger) -> Self {
        Self {
            name: name.into(),
            entrypoint,
            trigger: Arc::new(trigger),
        }
    }
}

/// Scheduler-side state of one job.
#[derive(Clone, Debug)]
pub struct ScheduledJob {
    /// Id assigned by the scheduler, carried in `ProcessStarted`/`ProcessScheduled`.
    pub id: u64,
    /// Job name.
    pub name: String,
    /// The job's trigger.
    pub trigger: Arc<dyn Trigger>,
    /// Next run; `None` while running or once retired.
    pub next_run_date: Option<DateTime<Utc>>,
    /// Pid of the most recent run.
    pub last_run_pid: Option<u32>,
    /// Completed runs.
    pub runs: u64,
    /// `true` once the trigger reported no further runs.
    pub retired: bool,
}

impl ScheduledJob {
    pub(crate) fn new(id: u64, spec: &JobSpec) -> Self {
        Self {
            id,
            name: spec.name.clone(),
            trigger: Arc::clone(&spec.trigger),
            next_run_date: None,
            last_run_pid: None,
            runs: 0,
            retired: false,
        }
    }

    /// Recomputes `next_run_date` from the trigger; a `None` answer retires the job for good.
    pub(crate) fn reschedule(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.retired {
            return None;
        }
        let next = self.trigger.next_run_date(now);
        self.next_run_date = next;
        self.retired = next.is_none();
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SupervisorConfig;
    use crate::scheduler::OnceTrigger;
    use chrono::TimeZone;

    #[test]
    fn test_retirement_is_permanent() {
        let at = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let spec = JobSpec::new(
            "report",
            WorkerSpec::with_defaults("report", "/bin/true", &SupervisorConfig::default()),
            OnceTrigger::at(at),
        );
        let mut job = ScheduledJob::new(1, &spec);
        assert_eq!(job.reschedule(at), None);
        assert!(job.retired);
        assert_eq!(job.reschedule(at - chrono::Duration::days(1)), None);
    }
}
