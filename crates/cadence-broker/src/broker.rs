use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cadence_core::{config::BrokerConfig, Clock};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{
    error::{BrokerError, Result},
    token,
    types::{
        AuditEntry, AuditEvent, BrokerSummary, IssuedToken, SweepSummary, TaskRecord, TaskScope,
        TaskState,
    },
};

/// Maximum number of audit entries kept; the oldest are dropped first.
pub const AUDIT_CAPACITY: usize = 500;

struct TaskEntry {
    record: TaskRecord,
    /// Digest of the live token, if any.
    digest: Option<String>,
}

#[derive(Default)]
struct State {
    tasks: HashMap<String, TaskEntry>,
    /// token digest -> task id, live tokens only.
    by_digest: HashMap<String, String>,
    active_tasks: u64,
    total_tokens_issued: u64,
    /// Newest at the front.
    audit: VecDeque<AuditEntry>,
}

impl State {
    fn record(
        &mut self,
        task_id: &str,
        repos: Vec<String>,
        event: AuditEvent,
        at: DateTime<Utc>,
    ) {
        self.audit.push_front(AuditEntry {
            at,
            task_id: task_id.to_string(),
            repos,
            event,
        });
        self.audit.truncate(AUDIT_CAPACITY);
    }

    /// Move an active task to `to`, dropping its token and its count.
    /// No-op for tasks that are not active.
    fn retire(&mut self, task_id: &str, to: TaskState, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if entry.record.state != TaskState::Active {
            return false;
        }
        if let Some(digest) = entry.digest.take() {
            self.by_digest.remove(&digest);
        }
        entry.record.state = to;
        entry.record.updated_at = now;
        let repos = entry.record.repos.clone();
        self.active_tasks = self.active_tasks.saturating_sub(1);

        let event = match to {
            TaskState::Expired => AuditEvent::TokenExpired,
            _ => AuditEvent::TokenRevoked,
        };
        self.record(task_id, repos, event, now);
        true
    }
}

/// Issues, validates and revokes per-task bearer tokens.
///
/// Tokens are stored only as SHA-256 digests. A task holds at most one live
/// token: issuing again invalidates the previous one.
pub struct TokenBroker {
    enabled: bool,
    ttl: chrono::Duration,
    retention: chrono::Duration,
    sweep_interval: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl TokenBroker {
    pub fn new(config: &BrokerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled: config.enabled,
            ttl: secs(config.token_ttl_secs),
            retention: secs(config.retention_secs),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
            clock,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Issue a fresh token for `task_id`, replacing any live one.
    ///
    /// `scope` replaces the task's repos and kind; `None` keeps what the task
    /// was last issued with.
    pub fn issue(&self, task_id: &str, scope: Option<TaskScope>) -> Result<IssuedToken> {
        if !self.enabled {
            return Err(BrokerError::Disabled);
        }
        let now = self.clock.now();
        let expires_at = now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let raw = token::generate();
        let digest = token::digest(&raw);

        let mut state = self.lock();
        let entry = state
            .tasks
            .entry(task_id.to_string())
            .or_insert_with(|| TaskEntry {
                record: TaskRecord {
                    task_id: task_id.to_string(),
                    state: TaskState::Revoked,
                    repos: Vec::new(),
                    kind: None,
                    issued_at: now,
                    expires_at,
                    updated_at: now,
                    tokens_issued: 0,
                },
                digest: None,
            });

        let previous = entry.digest.replace(digest.clone());
        let newly_active = entry.record.state != TaskState::Active;
        if let Some(scope) = scope {
            entry.record.repos = scope.repos;
            entry.record.kind = scope.kind;
        }
        entry.record.state = TaskState::Active;
        entry.record.issued_at = now;
        entry.record.expires_at = expires_at;
        entry.record.updated_at = now;
        entry.record.tokens_issued += 1;
        let repos = entry.record.repos.clone();

        if let Some(old) = previous {
            state.by_digest.remove(&old);
        }
        state.by_digest.insert(digest, task_id.to_string());
        if newly_active {
            state.active_tasks += 1;
        }
        state.total_tokens_issued += 1;
        state.record(task_id, repos.clone(), AuditEvent::TokenIssued, now);
        drop(state);

        info!(task_id = %task_id, ?repos, %expires_at, "token issued");
        Ok(IssuedToken {
            task_id: task_id.to_string(),
            token: raw,
            expires_at,
        })
    }

    /// Resolve a token to its task. Expiry noticed here is applied at once.
    pub fn validate(&self, token: &str) -> Result<String> {
        let now = self.clock.now();
        let digest = token::digest(token);
        let mut state = self.lock();

        let Some(task_id) = state.by_digest.get(&digest).cloned() else {
            debug!("token rejected: unknown");
            return Err(BrokerError::TokenInvalid);
        };
        let expired = state
            .tasks
            .get(&task_id)
            .map_or(true, |entry| entry.record.expires_at <= now);
        if expired {
            state.retire(&task_id, TaskState::Expired, now);
            debug!(task_id = %task_id, "token rejected: expired");
            return Err(BrokerError::TokenInvalid);
        }
        Ok(task_id)
    }

    /// Invalidate the task's live token. Returns whether there was one.
    pub fn revoke(&self, task_id: &str) -> bool {
        let now = self.clock.now();
        let revoked = self.lock().retire(task_id, TaskState::Revoked, now);
        if revoked {
            info!(task_id = %task_id, "token revoked");
        }
        revoked
    }

    /// Expire overdue tokens and forget dead records past the retention window.
    pub fn sweep(&self) -> SweepSummary {
        let now = self.clock.now();
        let mut state = self.lock();

        let overdue: Vec<String> = state
            .tasks
            .values()
            .filter(|e| e.record.state == TaskState::Active && e.record.expires_at <= now)
            .map(|e| e.record.task_id.clone())
            .collect();
        let mut summary = SweepSummary::default();
        for task_id in overdue {
            if state.retire(&task_id, TaskState::Expired, now) {
                summary.expired += 1;
            }
        }

        let cutoff = now
            .checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = state.tasks.len();
        state
            .tasks
            .retain(|_, e| e.record.state == TaskState::Active || e.record.updated_at > cutoff);
        summary.forgotten = before - state.tasks.len();
        drop(state);

        if summary != SweepSummary::default() {
            info!(
                expired = summary.expired,
                forgotten = summary.forgotten,
                "token sweep"
            );
        }
        summary
    }

    pub fn summary(&self) -> BrokerSummary {
        let state = self.lock();
        BrokerSummary {
            enabled: self.enabled,
            active_tasks: state.active_tasks,
            total_tokens_issued: state.total_tokens_issued,
            audit_entries: state.audit.len(),
        }
    }

    /// Every known task, keyed by id.
    pub fn tasks(&self) -> BTreeMap<String, TaskRecord> {
        self.lock()
            .tasks
            .iter()
            .map(|(id, e)| (id.clone(), e.record.clone()))
            .collect()
    }

    /// Audit entries, newest first, optionally for one task only.
    pub fn audit(&self, task_id: Option<&str>, limit: Option<usize>) -> Vec<AuditEntry> {
        self.lock()
            .audit
            .iter()
            .filter(|e| task_id.map_or(true, |id| e.task_id == id))
            .take(limit.unwrap_or(AUDIT_CAPACITY))
            .cloned()
            .collect()
    }

    /// Background expiry. Sweeps every `sweep_interval_secs` until `shutdown`
    /// broadcasts `true`.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.sweep_interval.as_secs(), "token sweeper started");
        let mut interval = tokio::time::interval(self.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("token sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Seconds as a chrono duration, saturating at its maximum.
fn secs(n: u64) -> chrono::Duration {
    i64::try_from(n)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}
