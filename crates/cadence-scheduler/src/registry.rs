//! In-memory job registry: the single source of truth for job state.
//!
//! Every read returns an owned [`JobSnapshot`]; every mutation happens under
//! one short-lived lock that is never held across a script's execution.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use cadence_core::CadenceConfig;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    schedule::CronSchedule,
    types::{round_secs, JobSnapshot, JobSpec, RunOutcome, RunStatus},
};

struct JobEntry {
    spec: JobSpec,
    /// `None` when the expression failed to parse; see `schedule_error`.
    schedule: Option<CronSchedule>,
    schedule_error: Option<String>,
    enabled: bool,
    running: bool,
    last_status: Option<RunStatus>,
    last_run: Option<DateTime<Utc>>,
    last_duration: Option<f64>,
    last_output: Option<String>,
    next_run: Option<DateTime<Utc>>,
    run_count: u64,
    fail_count: u64,
}

impl JobEntry {
    fn new(spec: JobSpec) -> Self {
        let (schedule, schedule_error) = match CronSchedule::parse(&spec.schedule) {
            Ok(s) => (Some(s), None),
            Err(e) => {
                error!(job = %spec.name, "{e}; job will not be scheduled");
                (None, Some(e.to_string()))
            }
        };
        Self {
            enabled: spec.enabled,
            spec,
            schedule,
            schedule_error,
            running: false,
            last_status: None,
            last_run: None,
            last_duration: None,
            last_output: None,
            next_run: None,
            run_count: 0,
            fail_count: 0,
        }
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            name: self.spec.name.clone(),
            schedule: self.spec.schedule.clone(),
            description: self.spec.description.clone(),
            script: self.spec.script.clone(),
            enabled: self.enabled,
            running: self.running,
            last_status: self.last_status,
            last_run: self.last_run,
            last_duration: self.last_duration,
            last_output: self.last_output.clone(),
            next_run: self.next_run,
            run_count: self.run_count,
            fail_count: self.fail_count,
            timeout_secs: self.spec.timeout.as_secs(),
            schedule_error: self.schedule_error.clone(),
        }
    }
}

#[derive(Default)]
struct Inner {
    /// Insertion order is the display order.
    jobs: Vec<JobEntry>,
    index: HashMap<String, usize>,
}

impl Inner {
    fn entry(&self, name: &str) -> Result<&JobEntry> {
        self.index
            .get(name)
            .map(|&i| &self.jobs[i])
            .ok_or_else(|| not_found(name))
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut JobEntry> {
        match self.index.get(name) {
            Some(&i) => Ok(&mut self.jobs[i]),
            None => Err(not_found(name)),
        }
    }
}

fn not_found(name: &str) -> SchedulerError {
    SchedulerError::JobNotFound {
        name: name.to_string(),
    }
}

/// Holds every configured job and its mutable runtime state.
pub struct JobRegistry {
    inner: Mutex<Inner>,
}

impl JobRegistry {
    /// Build a registry from static definitions.
    ///
    /// Later definitions reusing an existing name are dropped with a warning.
    /// Jobs with an unparsable schedule are kept (they can still be triggered
    /// by hand) but are never picked up by the scheduler loop.
    pub fn new(specs: impl IntoIterator<Item = JobSpec>) -> Self {
        let mut inner = Inner::default();
        for spec in specs {
            if inner.index.contains_key(&spec.name) {
                warn!(job = %spec.name, "duplicate job definition ignored");
                continue;
            }
            inner.index.insert(spec.name.clone(), inner.jobs.len());
            inner.jobs.push(JobEntry::new(spec));
        }
        info!(count = inner.jobs.len(), "job registry loaded");
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Build a registry from the `[[jobs]]` tables of a loaded config.
    pub fn from_config(config: &CadenceConfig) -> Self {
        let default_timeout = config.scheduler.default_timeout_secs;
        Self::new(
            config
                .jobs
                .iter()
                .map(|job| JobSpec::from_config(job, default_timeout)),
        )
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, name: &str) -> Result<JobSnapshot> {
        Ok(self.lock().entry(name)?.snapshot())
    }

    /// All jobs in configuration order.
    pub fn list(&self) -> Vec<JobSnapshot> {
        self.lock().jobs.iter().map(JobEntry::snapshot).collect()
    }

    /// Static definition of `name`, as needed to launch it.
    pub fn spec(&self, name: &str) -> Result<JobSpec> {
        Ok(self.lock().entry(name)?.spec.clone())
    }

    pub fn running_count(&self) -> usize {
        self.lock().jobs.iter().filter(|j| j.running).count()
    }

    /// Enable or disable automatic scheduling. Idempotent.
    ///
    /// Disabling leaves an in-flight run alone and clears `next_run`.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut inner = self.lock();
        let job = inner.entry_mut(name)?;
        if job.enabled != enabled {
            info!(job = %name, enabled, "job enabled flag changed");
        }
        job.enabled = enabled;
        if !enabled {
            job.next_run = None;
        }
        Ok(())
    }

    /// Atomically flip `running` from false to true.
    ///
    /// Returns `false` without touching anything if the job is already
    /// running. This is the only place a run is admitted.
    pub fn mark_running(&self, name: &str) -> Result<bool> {
        let mut inner = self.lock();
        let job = inner.entry_mut(name)?;
        if job.running {
            return Ok(false);
        }
        job.running = true;
        Ok(true)
    }

    /// Fold a finished run into the job and clear `running`.
    ///
    /// A completion for a job that is not running means the mutual-exclusion
    /// invariant is broken: it is logged loudly and rejected with state left
    /// untouched.
    pub fn record_completion(&self, name: &str, outcome: RunOutcome) -> Result<()> {
        let mut inner = self.lock();
        let job = inner.entry_mut(name)?;
        if !job.running {
            error!(job = %name, status = %outcome.status, "completion recorded for a job that was not running");
            return Err(SchedulerError::NotRunning {
                name: name.to_string(),
            });
        }
        job.running = false;
        job.last_status = Some(outcome.status);
        job.last_run = Some(outcome.started_at);
        job.last_duration = Some(round_secs(outcome.duration));
        job.last_output = Some(outcome.output);
        job.run_count += 1;
        if outcome.status.is_failure() {
            job.fail_count += 1;
        }
        Ok(())
    }

    /// Recompute `next_run` from `now` and store it.
    ///
    /// Disabled jobs and jobs with an invalid schedule get `None`.
    pub fn schedule_next(&self, name: &str, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let mut inner = self.lock();
        let job = inner.entry_mut(name)?;
        let next = match (&job.schedule, job.enabled) {
            (Some(schedule), true) => schedule.next_after(now),
            _ => None,
        };
        job.next_run = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn spec(name: &str, schedule: &str) -> JobSpec {
        JobSpec {
            name: name.to_string(),
            schedule: schedule.to_string(),
            description: format!("{name} job"),
            script: format!("{name}.sh"),
            enabled: true,
            timeout: Duration::from_secs(300),
        }
    }

    fn outcome(status: RunStatus) -> RunOutcome {
        RunOutcome {
            status,
            started_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            duration: Duration::from_millis(2_340),
            output: "done".to_string(),
        }
    }

    #[test]
    fn list_keeps_insertion_order() {
        let reg = JobRegistry::new([spec("zeta", "* * * * *"), spec("alpha", "* * * * *")]);
        let names: Vec<_> = reg.list().into_iter().map(|j| j.name).collect();
        assert_eq!(names, ["zeta", "alpha"]);
        // Stable across calls.
        let again: Vec<_> = reg.list().into_iter().map(|j| j.name).collect();
        assert_eq!(again, ["zeta", "alpha"]);
    }

    #[test]
    fn duplicate_names_keep_first_definition() {
        let mut second = spec("backup", "0 * * * *");
        second.script = "other.sh".into();
        let reg = JobRegistry::new([spec("backup", "* * * * *"), second]);
        assert_eq!(reg.list().len(), 1);
        assert_eq!(reg.get("backup").unwrap().script, "backup.sh");
    }

    #[test]
    fn unknown_job_is_not_found() {
        let reg = JobRegistry::new([spec("backup", "* * * * *")]);
        assert!(matches!(
            reg.get("nope"),
            Err(SchedulerError::JobNotFound { .. })
        ));
        assert!(reg.mark_running("nope").is_err());
        assert!(reg.set_enabled("nope", false).is_err());
    }

    #[test]
    fn mark_running_admits_one_run() {
        let reg = JobRegistry::new([spec("backup", "* * * * *")]);
        assert!(reg.mark_running("backup").unwrap());
        assert!(!reg.mark_running("backup").unwrap());
        assert!(reg.get("backup").unwrap().running);
        assert_eq!(reg.running_count(), 1);
    }

    #[test]
    fn completion_folds_into_state() {
        let reg = JobRegistry::new([spec("backup", "* * * * *")]);
        reg.mark_running("backup").unwrap();
        reg.record_completion("backup", outcome(RunStatus::Success))
            .unwrap();

        let job = reg.get("backup").unwrap();
        assert!(!job.running);
        assert_eq!(job.last_status, Some(RunStatus::Success));
        assert_eq!(job.last_duration, Some(2.3));
        assert_eq!(job.last_output.as_deref(), Some("done"));
        assert_eq!(job.run_count, 1);
        assert_eq!(job.fail_count, 0);

        reg.mark_running("backup").unwrap();
        reg.record_completion("backup", outcome(RunStatus::Timeout))
            .unwrap();
        let job = reg.get("backup").unwrap();
        assert_eq!(job.run_count, 2);
        assert_eq!(job.fail_count, 1);
    }

    #[test]
    fn completion_without_start_is_rejected() {
        let reg = JobRegistry::new([spec("backup", "* * * * *")]);
        let err = reg
            .record_completion("backup", outcome(RunStatus::Success))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NotRunning { .. }));
        let job = reg.get("backup").unwrap();
        assert_eq!(job.run_count, 0);
        assert_eq!(job.last_status, None);
    }

    #[test]
    fn second_completion_for_same_run_is_rejected() {
        let reg = JobRegistry::new([spec("backup", "* * * * *")]);
        reg.mark_running("backup").unwrap();
        reg.record_completion("backup", outcome(RunStatus::Success))
            .unwrap();
        assert!(reg
            .record_completion("backup", outcome(RunStatus::Success))
            .is_err());
        assert_eq!(reg.get("backup").unwrap().run_count, 1);
    }

    #[test]
    fn disable_clears_next_run_but_not_history() {
        let reg = JobRegistry::new([spec("backup", "* * * * *")]);
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 30).unwrap();
        assert!(reg.schedule_next("backup", now).unwrap().is_some());
        reg.mark_running("backup").unwrap();
        reg.record_completion("backup", outcome(RunStatus::Failed))
            .unwrap();

        reg.set_enabled("backup", false).unwrap();
        reg.set_enabled("backup", false).unwrap();
        let job = reg.get("backup").unwrap();
        assert!(!job.enabled);
        assert_eq!(job.next_run, None);
        assert_eq!(job.last_status, Some(RunStatus::Failed));
        assert_eq!(reg.schedule_next("backup", now).unwrap(), None);

        reg.set_enabled("backup", true).unwrap();
        assert_eq!(
            reg.schedule_next("backup", now).unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 1, 0).unwrap())
        );
    }

    #[test]
    fn disabling_does_not_interrupt_a_run() {
        let reg = JobRegistry::new([spec("backup", "* * * * *")]);
        reg.mark_running("backup").unwrap();
        reg.set_enabled("backup", false).unwrap();
        assert!(reg.get("backup").unwrap().running);
        reg.record_completion("backup", outcome(RunStatus::Success))
            .unwrap();
        assert_eq!(
            reg.get("backup").unwrap().last_status,
            Some(RunStatus::Success)
        );
    }

    #[test]
    fn invalid_schedule_is_kept_but_never_scheduled() {
        let reg = JobRegistry::new([spec("broken", "not a cron")]);
        let job = reg.get("broken").unwrap();
        assert!(job.schedule_error.is_some());
        assert!(!job.is_schedulable());
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        assert_eq!(reg.schedule_next("broken", now).unwrap(), None);
        // Manual runs are still admitted.
        assert!(reg.mark_running("broken").unwrap());
    }
}
