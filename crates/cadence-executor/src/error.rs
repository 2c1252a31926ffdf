//! Error types for the cadence-executor crate.

use thiserror::Error;

/// Errors that prevent a script from being run at all.
///
/// A script that starts and then fails or times out is not an error; see
/// [`crate::types::Termination`].
#[derive(Debug, Error)]
pub enum ExecError {
    /// The resolved script path does not exist or is not a file.
    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    /// The interpreter process could not be spawned.
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// Underlying I/O failure while waiting on the child.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ExecError>;
