//! Worker slot records owned by the agent pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskRole;

/// State of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Waiting for a task
    Idle,
    /// Supervising one subprocess invocation
    Running,
    /// Failed; removed from the pool and never reused
    Failed,
    /// Stopped during scale-down or shutdown
    Stopped,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

/// A worker slot in the pool.
///
/// Workers transition only idle↔running; failed and stopped are terminal.
/// At most one task is assigned at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Unique identifier
    pub id: String,
    /// Role from the most recent acquisition
    pub role: TaskRole,
    /// Task currently being supervised, when running
    pub current_task_id: Option<String>,
    /// Current state
    pub state: AgentState,
    /// When the slot was created
    pub created_at: DateTime<Utc>,
    /// Last assignment, release, or failure
    pub last_activity: DateTime<Utc>,
    /// Tasks completed successfully
    pub completed_tasks: u64,
    /// Tasks released with failure
    pub failed_tasks: u64,
    /// Accumulated execution time across tasks, in milliseconds
    pub total_execution_ms: u64,
}

impl AgentRecord {
    /// Create a fresh idle worker with the given role affinity.
    pub fn new(role: TaskRole) -> Self {
        let now = Utc::now();
        Self {
            id: format!("agent-{}", &Uuid::new_v4().simple().to_string()[..12]),
            role,
            current_task_id: None,
            state: AgentState::Idle,
            created_at: now,
            last_activity: now,
            completed_tasks: 0,
            failed_tasks: 0,
            total_execution_ms: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == AgentState::Idle
    }

    pub fn is_running(&self) -> bool {
        self.state == AgentState::Running
    }

    /// Assign a task, switching to running and adopting the requested role.
    pub fn assign(&mut self, role: TaskRole, task_id: Option<String>) {
        self.role = role;
        self.current_task_id = task_id;
        self.state = AgentState::Running;
        self.last_activity = Utc::now();
    }

    /// Release the worker back to idle, updating counters.
    pub fn finish(&mut self, success: bool) {
        let now = Utc::now();
        if success {
            self.completed_tasks += 1;
        } else {
            self.failed_tasks += 1;
        }
        let elapsed = now.signed_duration_since(self.last_activity);
        self.total_execution_ms += u64::try_from(elapsed.num_milliseconds().max(0)).unwrap_or(0);
        self.current_task_id = None;
        self.state = AgentState::Idle;
        self.last_activity = now;
    }

    /// Milliseconds since the last recorded activity.
    pub fn idle_ms(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from(
            now.signed_duration_since(self.last_activity)
                .num_milliseconds()
                .max(0),
        )
        .unwrap_or(0)
    }
}
