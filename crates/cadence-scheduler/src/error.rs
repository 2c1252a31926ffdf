use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The schedule expression could not be parsed or never fires again.
    #[error("Invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    /// No job with the given name is registered.
    #[error("Job not found: {name}")]
    JobNotFound { name: String },

    /// A completion was reported for a job that was not marked running.
    /// This means the one-run-per-job invariant has been broken somewhere.
    #[error("Job {name} completed without a matching start")]
    NotRunning { name: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
