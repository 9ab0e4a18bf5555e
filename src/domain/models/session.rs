//! Session domain model.
//!
//! A session owns one task tree, one context store, and its checkpoint
//! history. Terminal sessions are immutable; expired sessions are eligible
//! for garbage collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::config::SwarmConfig;

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created but not yet running
    Initializing,
    /// The orchestrator loop is driving the task tree
    Active,
    /// Paused; in-flight tasks drain, new dispatches are withheld
    Paused,
    /// All work finished; terminal
    Completed,
    /// The session failed; terminal
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "initializing" => Some(Self::Initializing),
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Aggregated counters for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Task counts keyed by status name
    pub tasks_by_status: HashMap<String, usize>,
    /// Task counts keyed by role name
    pub tasks_by_role: HashMap<String, usize>,
    /// Task counts keyed by depth
    pub tasks_by_depth: HashMap<u32, usize>,
    /// Total tasks ever added to the tree
    pub total_tasks: usize,
    /// Workers currently registered to the session
    pub current_active_agents: usize,
    /// High-water mark of registered workers
    pub peak_active_agents: usize,
    /// Checkpoints written for this session
    pub checkpoints_taken: u64,
    /// Checkpoints restored into this session
    pub checkpoints_restored: u64,
    /// Judge verdicts that passed
    pub judge_approvals: u64,
    /// Judge verdicts that failed
    pub judge_rejections: u64,
    /// Mean execution time across completed tasks, in milliseconds
    pub avg_task_execution_ms: f64,
}

impl SessionMetrics {
    /// Record a worker registration, maintaining the high-water mark.
    pub fn agent_registered(&mut self) {
        self.current_active_agents += 1;
        self.peak_active_agents = self.peak_active_agents.max(self.current_active_agents);
    }

    /// Record a worker removal.
    pub fn agent_removed(&mut self) {
        self.current_active_agents = self.current_active_agents.saturating_sub(1);
    }

    /// Fold one completed-task execution time into the running mean.
    pub fn record_execution_ms(&mut self, ms: u64) {
        let completed = self
            .tasks_by_status
            .get("completed")
            .copied()
            .unwrap_or(0)
            .max(1);
        #[allow(clippy::cast_precision_loss)]
        let n = completed as f64;
        #[allow(clippy::cast_precision_loss)]
        let sample = ms as f64;
        self.avg_task_execution_ms += (sample - self.avg_task_execution_ms) / n;
    }
}

/// One entry in a session's bounded error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionErrorEntry {
    /// When the error was recorded
    pub at: DateTime<Utc>,
    /// Task the error is attributed to, when task-scoped
    pub task_id: Option<String>,
    /// Error description
    pub message: String,
}

/// A top-level unit of work: one task tree, one context store, one
/// checkpoint history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmSession {
    /// Unique identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Optional description
    pub description: String,
    /// Root task id of the session's tree
    pub root_task_id: String,
    /// Current status
    pub status: SessionStatus,
    /// Configuration snapshot taken at creation
    pub config: SwarmConfig,
    /// Checkpoint ids in creation order
    pub checkpoint_ids: Vec<String>,
    /// Most recent checkpoint id
    pub latest_checkpoint_id: Option<String>,
    /// Aggregated metrics
    pub metrics: SessionMetrics,
    /// Bounded append-only error log
    pub errors: Vec<SessionErrorEntry>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When the orchestrator first started the session
    pub started_at: Option<DateTime<Utc>>,
    /// When last paused
    pub paused_at: Option<DateTime<Utc>>,
    /// When last resumed
    pub resumed_at: Option<DateTime<Utc>>,
    /// When the session reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    /// After this instant the session may be garbage-collected
    pub expires_at: DateTime<Utc>,
}

impl SwarmSession {
    /// Maximum number of error entries retained; the oldest are evicted.
    pub const MAX_ERRORS: usize = 100;

    /// Create a new session snapshotting the given configuration.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        root_task_id: impl Into<String>,
        config: SwarmConfig,
    ) -> Self {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::milliseconds(
                i64::try_from(config.session_timeout_ms).unwrap_or(i64::MAX),
            );
        Self {
            id: generate_session_id(now),
            name: name.into(),
            description: description.into(),
            root_task_id: root_task_id.into(),
            status: SessionStatus::Initializing,
            config,
            checkpoint_ids: Vec::new(),
            latest_checkpoint_id: None,
            metrics: SessionMetrics::default(),
            errors: Vec::new(),
            created_at: now,
            started_at: None,
            paused_at: None,
            resumed_at: None,
            completed_at: None,
            expires_at,
        }
    }

    /// Update the status, stamping the matching timestamp.
    pub fn update_status(&mut self, status: SessionStatus) {
        self.status = status;
        let now = Utc::now();
        match status {
            SessionStatus::Active => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                } else {
                    self.resumed_at = Some(now);
                }
            }
            SessionStatus::Paused => self.paused_at = Some(now),
            SessionStatus::Completed | SessionStatus::Failed => self.completed_at = Some(now),
            SessionStatus::Initializing => {}
        }
    }

    /// Append an error entry, evicting the oldest past the cap.
    pub fn push_error(&mut self, task_id: Option<String>, message: impl Into<String>) {
        self.errors.push(SessionErrorEntry {
            at: Utc::now(),
            task_id,
            message: message.into(),
        });
        if self.errors.len() > Self::MAX_ERRORS {
            let excess = self.errors.len() - Self::MAX_ERRORS;
            self.errors.drain(..excess);
        }
    }

    /// Record a new checkpoint id as the latest.
    pub fn record_checkpoint(&mut self, checkpoint_id: impl Into<String>) {
        let checkpoint_id = checkpoint_id.into();
        self.checkpoint_ids.push(checkpoint_id.clone());
        self.latest_checkpoint_id = Some(checkpoint_id);
        self.metrics.checkpoints_taken += 1;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Generate a session id embedding the creation timestamp.
fn generate_session_id(now: DateTime<Utc>) -> String {
    format!(
        "session-{}-{}",
        now.timestamp_millis(),
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    )
}
