use std::sync::Arc;
use std::time::Duration;

use cadence_core::Clock;
use tokio::sync::watch;
use tracing::{error, info};

use crate::{
    dispatch::{Dispatcher, TriggerOutcome},
    error::Result,
    registry::JobRegistry,
    types::JobSnapshot,
};

/// Control surface used by the HTTP layer while the engine loop runs.
///
/// Every call is a short registry operation; none waits on a script.
#[derive(Clone)]
pub struct SchedulerHandle {
    registry: Arc<JobRegistry>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
}

impl SchedulerHandle {
    pub fn new(registry: Arc<JobRegistry>, dispatcher: Dispatcher, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            dispatcher,
            clock,
        }
    }

    /// Start a run now, regardless of schedule or enabled flag.
    pub fn trigger(&self, name: &str) -> Result<TriggerOutcome> {
        let outcome = self.dispatcher.try_start(name)?;
        if outcome == TriggerOutcome::AlreadyRunning {
            info!(job = %name, "manual trigger ignored: already running");
        }
        Ok(outcome)
    }

    /// Re-enable automatic scheduling and compute the next fire time.
    pub fn enable(&self, name: &str) -> Result<()> {
        self.registry.set_enabled(name, true)?;
        self.registry.schedule_next(name, self.clock.now())?;
        Ok(())
    }

    pub fn disable(&self, name: &str) -> Result<()> {
        self.registry.set_enabled(name, false)
    }

    pub fn job(&self, name: &str) -> Result<JobSnapshot> {
        self.registry.get(name)
    }

    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.registry.list()
    }

    pub fn running_count(&self) -> usize {
        self.registry.running_count()
    }
}

/// What a single [`SchedulerEngine::tick`] did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub started: usize,
    /// Due jobs dropped because their previous run was still going.
    pub skipped: usize,
}

/// Polling loop that fires due jobs.
pub struct SchedulerEngine {
    registry: Arc<JobRegistry>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl SchedulerEngine {
    pub fn new(
        registry: Arc<JobRegistry>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            clock,
            poll_interval,
        }
    }

    /// A control handle sharing this engine's registry and dispatcher.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle::new(
            Arc::clone(&self.registry),
            self.dispatcher.clone(),
            Arc::clone(&self.clock),
        )
    }

    /// Main event loop. Ticks every `poll_interval` until `shutdown` broadcasts `true`.
    ///
    /// In-flight runs are not cancelled on shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "scheduler engine started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Process every job once against the current clock reading.
    ///
    /// Enabled jobs without a `next_run` get one. Jobs whose `next_run` has
    /// arrived are started, or skipped if still running; either way their
    /// `next_run` moves past now, so missed fires are never queued.
    pub fn tick(&self) -> TickSummary {
        let now = self.clock.now();
        let mut summary = TickSummary::default();

        for job in self.registry.list() {
            if !job.is_schedulable() {
                continue;
            }
            let Some(next_run) = job.next_run else {
                if let Err(e) = self.registry.schedule_next(&job.name, now) {
                    error!(job = %job.name, "failed to compute next run: {e}");
                }
                continue;
            };
            if next_run > now {
                continue;
            }

            match self.dispatcher.try_start(&job.name) {
                Ok(TriggerOutcome::Started { .. }) => summary.started += 1,
                Ok(TriggerOutcome::AlreadyRunning) => {
                    info!(job = %job.name, "skipping scheduled run: previous run still active");
                    summary.skipped += 1;
                }
                Err(e) => error!(job = %job.name, "scheduled start failed: {e}"),
            }

            if let Err(e) = self.registry.schedule_next(&job.name, now) {
                error!(job = %job.name, "failed to compute next run: {e}");
            }
        }
        summary
    }
}
