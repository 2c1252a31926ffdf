//! `cadence-scheduler`: cron-driven job scheduling over an in-memory registry.
//!
//! # Overview
//!
//! Jobs come from configuration and live in a [`registry::JobRegistry`]. The
//! [`engine::SchedulerEngine`] polls the registry on a short interval, starts
//! any enabled job whose `next_run` has arrived, and moves `next_run` forward.
//! Runs execute on their own Tokio tasks through the [`dispatch::Dispatcher`];
//! the [`dispatch::CompletionLoop`] records each result back into the registry.
//!
//! A job never runs twice at once. A fire that lands while the previous run
//! is still going is dropped, not queued.
//!
//! # Schedules
//!
//! | Form      | Example            | Notes                                   |
//! |-----------|--------------------|-----------------------------------------|
//! | 5 fields  | `*/5 * * * *`      | crontab; weekday 0 or 7 is Sunday       |
//! | 6 fields  | `0 */5 * * * *`    | leading seconds field                   |
//! | 7 fields  | `0 0 3 * * * 2030` | trailing year field                     |
//!
//! All schedules are evaluated in UTC.

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod registry;
pub mod schedule;
pub mod types;

pub use dispatch::{CompletionLoop, Dispatcher, InFlightRun, TriggerOutcome};
pub use engine::{SchedulerEngine, SchedulerHandle, TickSummary};
pub use error::{Result, SchedulerError};
pub use registry::JobRegistry;
pub use schedule::{next_trigger, CronSchedule};
pub use types::{JobSnapshot, JobSpec, RunOutcome, RunReport, RunStatus};
