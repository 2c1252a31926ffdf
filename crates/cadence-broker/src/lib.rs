//! `cadence-broker`: short-lived bearer tokens scoped to a single task.
//!
//! A collaborator asks for a token for `task_id`, hands it to whatever runs
//! the task, and that process presents it back for validation. Tokens expire
//! after a TTL, can be revoked early, and are replaced when the same task is
//! issued again. Only SHA-256 digests of tokens are held in memory.

pub mod broker;
pub mod error;
pub mod token;
pub mod types;

pub use broker::{TokenBroker, AUDIT_CAPACITY};
pub use error::{BrokerError, Result};
pub use types::{
    AuditEntry, AuditEvent, BrokerSummary, IssuedToken, SweepSummary, TaskRecord, TaskScope,
    TaskState,
};
