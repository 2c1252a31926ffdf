use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a task's credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Holds a live token and counts towards `active_tasks`.
    Active,
    Revoked,
    Expired,
}

/// What a task is allowed to touch, supplied by the collaborator at issue time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskScope {
    #[serde(default)]
    pub repos: Vec<String>,
    /// Free-form task category, e.g. the kind of worker that runs it.
    #[serde(default)]
    pub kind: Option<String>,
}

/// What the broker remembers about a task. Never includes the token itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub state: TaskState,
    pub repos: Vec<String>,
    pub kind: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Last state change; drives retention of dead records.
    pub updated_at: DateTime<Utc>,
    pub tokens_issued: u64,
}

/// A freshly issued credential. The only place a raw token appears.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    pub task_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    TokenIssued,
    TokenRevoked,
    TokenExpired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub task_id: String,
    /// The task's repos when the event happened.
    pub repos: Vec<String>,
    pub event: AuditEvent,
}

/// Counters reported on the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSummary {
    pub enabled: bool,
    pub active_tasks: u64,
    pub total_tokens_issued: u64,
    pub audit_entries: usize,
}

/// What one sweep pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub expired: usize,
    /// Dead task records dropped after the retention window.
    pub forgotten: usize,
}
