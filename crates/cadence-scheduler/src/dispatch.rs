//! Run hand-off between whoever starts a run and whoever records it.
//!
//! [`Dispatcher::try_start`] admits a run through the registry, spawns it, and
//! sends an owned [`InFlightRun`] over an unbounded channel. The
//! [`CompletionLoop`] awaits each handle and folds the report back into the
//! registry, so every admitted run is recorded exactly once even if the run
//! task panics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cadence_core::Clock;
use cadence_executor::{ScriptRunner, Termination};
use chrono::{DateTime, Utc};
use tokio::{
    sync::mpsc,
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::Result,
    registry::JobRegistry,
    types::{round_secs, JobSpec, RunOutcome, RunReport, RunStatus},
};

/// Result of asking for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started { run_id: Uuid },
    /// The job already has a run in flight; nothing was started.
    AlreadyRunning,
}

/// A run that has been spawned but not yet recorded.
pub struct InFlightRun {
    pub job: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    started: Instant,
    handle: JoinHandle<RunOutcome>,
}

impl InFlightRun {
    /// Wait for the run task. A task that panicked or was cancelled is
    /// reported as an `error` outcome.
    pub async fn finish(self) -> RunReport {
        let outcome = match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome {
                status: RunStatus::Error,
                started_at: self.started_at,
                duration: self.started.elapsed(),
                output: format!("run task failed: {e}"),
            },
        };
        RunReport {
            job: self.job,
            run_id: self.run_id,
            outcome,
        }
    }
}

/// Starts runs. Cheap to clone; every clone feeds the same completion loop.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<JobRegistry>,
    runner: Arc<ScriptRunner>,
    clock: Arc<dyn Clock>,
    inflight_tx: mpsc::UnboundedSender<InFlightRun>,
}

impl Dispatcher {
    /// Create a dispatcher and the loop that must be spawned to record its runs.
    pub fn new(
        registry: Arc<JobRegistry>,
        runner: Arc<ScriptRunner>,
        clock: Arc<dyn Clock>,
    ) -> (Self, CompletionLoop) {
        let (inflight_tx, rx) = mpsc::unbounded_channel();
        let completion = CompletionLoop {
            registry: Arc::clone(&registry),
            rx,
        };
        (
            Self {
                registry,
                runner,
                clock,
                inflight_tx,
            },
            completion,
        )
    }

    /// Start `name` unless it is already running. Returns without waiting for
    /// the script. Ignores the enabled flag.
    pub fn try_start(&self, name: &str) -> Result<TriggerOutcome> {
        let spec = self.registry.spec(name)?;
        if !self.registry.mark_running(name)? {
            return Ok(TriggerOutcome::AlreadyRunning);
        }

        let run_id = Uuid::new_v4();
        let started_at = self.clock.now();
        info!(job = %name, %run_id, "job started");

        let runner = Arc::clone(&self.runner);
        let handle = tokio::spawn(async move { execute(&runner, &spec, started_at).await });
        let run = InFlightRun {
            job: name.to_string(),
            run_id,
            started_at,
            started: Instant::now(),
            handle,
        };

        if let Err(mpsc::error::SendError(run)) = self.inflight_tx.send(run) {
            warn!(job = %name, "completion loop gone; recording run directly");
            let registry = Arc::clone(&self.registry);
            tokio::spawn(async move { record(&registry, run.finish().await) });
        }
        Ok(TriggerOutcome::Started { run_id })
    }
}

/// Run the job's script once and classify what happened.
pub async fn execute(
    runner: &ScriptRunner,
    spec: &JobSpec,
    started_at: DateTime<Utc>,
) -> RunOutcome {
    let begun = Instant::now();
    match runner.exec(&spec.script, spec.timeout).await {
        Ok(result) => {
            let (status, output) = match result.termination {
                Termination::Exited(0) => (RunStatus::Success, result.output),
                Termination::Exited(_) | Termination::Signalled => {
                    (RunStatus::Failed, result.output)
                }
                Termination::TimedOut => (
                    RunStatus::Timeout,
                    with_timeout_note(result.output, spec.timeout),
                ),
            };
            RunOutcome {
                status,
                started_at,
                duration: result.elapsed,
                output,
            }
        }
        Err(e) => RunOutcome {
            status: RunStatus::Error,
            started_at,
            duration: begun.elapsed(),
            output: e.to_string(),
        },
    }
}

/// The note sits outside the output cap, like the truncation marker: the cap
/// bounds what the script printed, markers come on top.
fn with_timeout_note(mut output: String, timeout: Duration) -> String {
    if !output.is_empty() && !output.ends_with('\n') {
        output.push('\n');
    }
    output.push_str(&format!("[timed out after {}s]", timeout.as_secs()));
    output
}

fn record(registry: &JobRegistry, report: RunReport) {
    let RunReport { job, run_id, outcome } = report;
    let status = outcome.status;
    let secs = round_secs(outcome.duration);
    match registry.record_completion(&job, outcome) {
        Ok(()) if status.is_failure() => {
            warn!(job = %job, %run_id, %status, "job finished in {secs:.1}s")
        }
        Ok(()) => info!(job = %job, %run_id, %status, "job finished in {secs:.1}s"),
        Err(e) => error!(job = %job, %run_id, "failed to record run: {e}"),
    }
}

/// Receives in-flight runs and records each one as it finishes.
pub struct CompletionLoop {
    registry: Arc<JobRegistry>,
    rx: mpsc::UnboundedReceiver<InFlightRun>,
}

impl CompletionLoop {
    /// Runs until every [`Dispatcher`] clone is dropped and all outstanding
    /// runs have been recorded.
    pub async fn run(mut self) {
        let mut pending: JoinSet<RunReport> = JoinSet::new();
        loop {
            tokio::select! {
                run = self.rx.recv() => match run {
                    Some(run) => {
                        debug!(job = %run.job, run_id = %run.run_id, "awaiting run");
                        pending.spawn(run.finish());
                    }
                    None => break,
                },
                Some(joined) = pending.join_next(), if !pending.is_empty() => {
                    self.fold(joined);
                }
            }
        }
        while let Some(joined) = pending.join_next().await {
            self.fold(joined);
        }
        debug!("completion loop stopped");
    }

    fn fold(&self, joined: std::result::Result<RunReport, tokio::task::JoinError>) {
        match joined {
            Ok(report) => record(&self.registry, report),
            Err(e) => error!("completion waiter failed: {e}"),
        }
    }
}
