//! cadence-executor: runs job scripts as child processes.
//!
//! Every run gets:
//! - a hard timeout that kills the script's whole process group
//! - combined stdout/stderr capture, bounded to the most recent bytes
//! - the configured environment plus the script directory on `PATH`
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use cadence_executor::ScriptRunner;
//!
//! #[tokio::main]
//! async fn main() {
//!     let runner = ScriptRunner::new("bash", "/opt/cadence/scripts");
//!     let result = runner.exec("backup.sh", Duration::from_secs(300)).await.unwrap();
//!     println!("{:?}: {}", result.termination, result.output);
//! }
//! ```

pub mod error;
pub mod output;
pub mod runner;
pub mod types;

pub use error::{ExecError, Result};
pub use runner::ScriptRunner;
pub use types::{ExecResult, Termination};
