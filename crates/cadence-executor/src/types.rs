//! Shared data types for cadence-executor.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Termination
// ---------------------------------------------------------------------------

/// How a script run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "code")]
pub enum Termination {
    /// The interpreter exited on its own with this exit code.
    Exited(i32),

    /// The interpreter was killed by a signal we did not send.
    Signalled,

    /// The run exceeded its time budget and its process group was killed.
    TimedOut,
}

// ---------------------------------------------------------------------------
// ExecResult
// ---------------------------------------------------------------------------

/// Result returned by `ScriptRunner::exec`.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub termination: Termination,

    /// Combined stdout and stderr, ANSI escapes stripped, tail-bounded.
    pub output: String,

    /// Wall time between spawn and exit (or kill).
    pub elapsed: Duration,
}

impl ExecResult {
    /// `true` only for a clean exit with status 0.
    pub fn is_success(&self) -> bool {
        self.termination == Termination::Exited(0)
    }
}
