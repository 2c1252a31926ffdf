use std::time::Duration;

use cadence_core::config::JobConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The script exited with status 0.
    Success,
    /// The script exited non-zero or was killed by a signal.
    Failed,
    /// The script exceeded its timeout and was killed.
    Timeout,
    /// The script could not be started at all.
    Error,
}

impl RunStatus {
    /// Whether this outcome counts towards `fail_count`.
    pub fn is_failure(self) -> bool {
        !matches!(self, RunStatus::Success)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Timeout => "timeout",
            RunStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            "timeout" => Ok(RunStatus::Timeout),
            "error" => Ok(RunStatus::Error),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Static definition of a job, fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    /// Cron expression as written in the configuration.
    pub schedule: String,
    pub description: String,
    /// Script file name, resolved by the executor.
    pub script: String,
    /// Initial enabled flag.
    pub enabled: bool,
    pub timeout: Duration,
}

impl JobSpec {
    pub fn from_config(job: &JobConfig, default_timeout_secs: u64) -> Self {
        Self {
            name: job.name.clone(),
            schedule: job.schedule.clone(),
            description: job.description.clone(),
            script: job.script.clone(),
            enabled: job.enabled,
            timeout: Duration::from_secs(job.timeout_secs.unwrap_or(default_timeout_secs)),
        }
    }
}

/// What a single run produced, before it is folded into the job.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub output: String,
}

/// A finished run, addressed to the job it belongs to.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub job: String,
    pub run_id: Uuid,
    pub outcome: RunOutcome,
}

/// Read-only copy of a job's definition and runtime state.
///
/// This is the shape the dashboard renders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub name: String,
    pub schedule: String,
    pub description: String,
    pub script: String,
    pub enabled: bool,
    pub running: bool,
    /// `None` until the first run completes.
    pub last_status: Option<RunStatus>,
    /// Start time of the most recent completed run.
    pub last_run: Option<DateTime<Utc>>,
    /// Seconds, rounded to one decimal.
    pub last_duration: Option<f64>,
    pub last_output: Option<String>,
    /// Only set while the job is enabled and its schedule is valid.
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub fail_count: u64,
    pub timeout_secs: u64,
    /// Set when the schedule failed to parse; such jobs are never auto-run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_error: Option<String>,
}

impl JobSnapshot {
    /// Whether the scheduler loop may run this job on its own.
    pub fn is_schedulable(&self) -> bool {
        self.enabled && self.schedule_error.is_none()
    }
}

/// Seconds rounded to one decimal place.
pub(crate) fn round_secs(d: Duration) -> f64 {
    (d.as_secs_f64() * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_success_is_not_a_failure() {
        assert!(!RunStatus::Success.is_failure());
        assert!(RunStatus::Failed.is_failure());
        assert!(RunStatus::Timeout.is_failure());
        assert!(RunStatus::Error.is_failure());
    }

    #[test]
    fn status_string_forms_agree_with_serde() {
        for status in [
            RunStatus::Success,
            RunStatus::Failed,
            RunStatus::Timeout,
            RunStatus::Error,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
            assert_eq!(status.to_string().parse::<RunStatus>().unwrap(), status);
        }
    }

    #[test]
    fn job_timeout_falls_back_to_default() {
        let cfg = JobConfig {
            name: "backup".into(),
            schedule: "0 * * * *".into(),
            description: String::new(),
            script: "backup.sh".into(),
            enabled: true,
            timeout_secs: None,
        };
        assert_eq!(JobSpec::from_config(&cfg, 300).timeout, Duration::from_secs(300));

        let cfg = JobConfig {
            timeout_secs: Some(30),
            ..cfg
        };
        assert_eq!(JobSpec::from_config(&cfg, 300).timeout, Duration::from_secs(30));
    }

    #[test]
    fn durations_round_to_tenths() {
        assert_eq!(round_secs(Duration::from_millis(1_249)), 1.2);
        assert_eq!(round_secs(Duration::from_millis(1_250)), 1.3);
        assert_eq!(round_secs(Duration::ZERO), 0.0);
    }
}
