//! Hierarchical task domain model.
//!
//! Tasks form a tree rooted at the session's root task. Edges are both
//! parent/child (decomposition) and dependency (scheduling). A task becomes
//! executable once it is `pending` and every dependency is `completed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::domain::errors::PlannerError;

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is defined but not yet scheduled
    Pending,
    /// Task was selected into a dispatch batch
    Queued,
    /// Task is currently being executed by a worker
    InProgress,
    /// Task execution finished, awaiting judge verification
    Verifying,
    /// Judge rejected the result; the task returns to pending with an
    /// incremented retry count
    Rework,
    /// Task completed successfully
    Completed,
    /// Task failed during execution or verification
    Failed,
    /// Task is blocked by failed dependencies
    Blocked,
    /// Task was cancelled
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Verifying => "verifying",
            Self::Rework => "rework",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "queued" => Some(Self::Queued),
            "in_progress" => Some(Self::InProgress),
            "verifying" => Some(Self::Verifying),
            "rework" => Some(Self::Rework),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[
                Self::Queued,
                Self::InProgress,
                Self::Blocked,
                Self::Cancelled,
            ],
            Self::Queued => &[Self::InProgress, Self::Pending, Self::Cancelled],
            Self::InProgress => &[
                Self::Verifying,
                Self::Completed,
                Self::Failed,
                Self::Cancelled,
            ],
            Self::Verifying => &[Self::Completed, Self::Rework, Self::Failed],
            Self::Rework => &[Self::Pending],
            Self::Blocked => &[Self::Pending, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// Specialist role a task is dispatched under. The role selects the worker
/// assignment and the judge's verification criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRole {
    Analysis,
    Implementation,
    Testing,
    Documentation,
    Debugging,
    Planner,
    Judge,
    Synthesizer,
    Monitor,
}

impl Default for TaskRole {
    fn default() -> Self {
        Self::Implementation
    }
}

impl TaskRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Implementation => "implementation",
            Self::Testing => "testing",
            Self::Documentation => "documentation",
            Self::Debugging => "debugging",
            Self::Planner => "planner",
            Self::Judge => "judge",
            Self::Synthesizer => "synthesizer",
            Self::Monitor => "monitor",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "analysis" => Some(Self::Analysis),
            "implementation" => Some(Self::Implementation),
            "testing" => Some(Self::Testing),
            "documentation" => Some(Self::Documentation),
            "debugging" => Some(Self::Debugging),
            "planner" => Some(Self::Planner),
            "judge" => Some(Self::Judge),
            "synthesizer" => Some(Self::Synthesizer),
            "monitor" => Some(Self::Monitor),
            _ => None,
        }
    }
}

/// Priority level used to order pool acquisitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Rank used by the pool's wait queue; higher ranks are served first.
    pub fn queue_rank(&self) -> u8 {
        *self as u8
    }
}

/// How much of a task's output flows back to its dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnMode {
    /// Only the summary (or a truncated output) is propagated.
    Summary,
    /// The full output is propagated.
    Full,
}

impl Default for ReturnMode {
    fn default() -> Self {
        Self::Summary
    }
}

/// A node in the hierarchical task tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalTask {
    /// Stable string identifier
    pub id: String,
    /// Parent task (None for the root)
    pub parent_id: Option<String>,
    /// Tree depth; root is 0, children are parent depth + 1
    pub depth: u32,
    /// Child task ids in creation order
    pub children: Vec<String>,
    /// Prompt text handed to the worker
    pub prompt: String,
    /// Specialist role
    pub role: TaskRole,
    /// Working directory for the worker subprocess
    pub work_folder: String,
    /// How much output flows to dependents
    pub return_mode: ReturnMode,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Task ids that must be completed before this task may run
    pub dependencies: Vec<String>,
    /// Scheduling priority
    pub priority: TaskPriority,
    /// Current retry count
    pub retry_count: u32,
    /// Maximum retries before the task fails permanently
    pub max_retries: u32,
    /// Current status
    pub status: TaskStatus,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When execution started
    pub started_at: Option<DateTime<Utc>>,
    /// When execution completed
    pub completed_at: Option<DateTime<Utc>>,
    /// Last worker this task was assigned to
    pub assigned_agent: Option<String>,
}

impl HierarchicalTask {
    /// Create a new root-level task from a prompt.
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            depth: 0,
            children: Vec::new(),
            prompt: prompt.into(),
            role: TaskRole::default(),
            work_folder: ".".to_string(),
            return_mode: ReturnMode::default(),
            tags: Vec::new(),
            metadata: HashMap::new(),
            dependencies: Vec::new(),
            priority: TaskPriority::default(),
            retry_count: 0,
            max_retries: 2,
            status: TaskStatus::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            assigned_agent: None,
        }
    }

    /// Set the parent, deriving depth from it.
    pub fn with_parent(mut self, parent_id: impl Into<String>, parent_depth: u32) -> Self {
        self.parent_id = Some(parent_id.into());
        self.depth = parent_depth + 1;
        self
    }

    /// Set role.
    pub fn with_role(mut self, role: TaskRole) -> Self {
        self.role = role;
        self
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set work folder.
    pub fn with_work_folder(mut self, folder: impl Into<String>) -> Self {
        self.work_folder = folder.into();
        self
    }

    /// Set return mode.
    pub fn with_return_mode(mut self, mode: ReturnMode) -> Self {
        self.return_mode = mode;
        self
    }

    /// Add a dependency, ignoring duplicates and self-references.
    pub fn with_dependency(mut self, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        if task_id != self.id && !self.dependencies.contains(&task_id) {
            self.dependencies.push(task_id);
        }
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Set max retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Check if this task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to a new status, updating timestamps.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> Result<(), (TaskStatus, TaskStatus)> {
        if !self.can_transition_to(new_status) {
            return Err((self.status, new_status));
        }
        self.apply_status(new_status);
        Ok(())
    }

    /// Force a status, bypassing the state machine.
    ///
    /// Only for crash recovery and checkpoint restore; a warning is emitted
    /// so bypass sites stay visible in logs.
    pub fn force_status(&mut self, new_status: TaskStatus, reason: &str) {
        tracing::warn!(
            task_id = %self.id,
            from = %self.status.as_str(),
            to = %new_status.as_str(),
            reason = reason,
            "Forcing task status transition"
        );
        self.apply_status(new_status);
    }

    fn apply_status(&mut self, new_status: TaskStatus) {
        self.status = new_status;
        match new_status {
            TaskStatus::InProgress => self.started_at = Some(Utc::now()),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }
    }

    /// Check if the task may be sent back for rework.
    pub fn can_rework(&self) -> bool {
        self.status == TaskStatus::Verifying && self.retry_count < self.max_retries
    }

    /// Send the task back to `pending` with an incremented retry count.
    ///
    /// When `rework_prompt` is given it replaces the task's prompt so the
    /// next attempt carries the judge's instructions.
    pub fn rework(&mut self, rework_prompt: Option<String>) -> Result<(), (TaskStatus, TaskStatus)> {
        self.transition_to(TaskStatus::Rework)?;
        self.retry_count += 1;
        if let Some(prompt) = rework_prompt {
            self.prompt = prompt;
        }
        self.assigned_agent = None;
        self.status = TaskStatus::Pending;
        Ok(())
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<(), PlannerError> {
        if self.id.is_empty() {
            return Err(PlannerError::InvalidTask("task id cannot be empty".into()));
        }
        if self.prompt.trim().is_empty() {
            return Err(PlannerError::InvalidTask(format!(
                "task {} has an empty prompt",
                self.id
            )));
        }
        if self.dependencies.contains(&self.id) {
            return Err(PlannerError::InvalidTask(format!(
                "task {} depends on itself",
                self.id
            )));
        }
        Ok(())
    }
}

/// Generate a task id that does not collide with any id in `existing`.
pub fn generate_task_id(existing: &HashSet<String>) -> String {
    loop {
        let id = format!("task-{}", &Uuid::new_v4().simple().to_string()[..12]);
        if !existing.contains(&id) {
            return id;
        }
    }
}

/// Per-status, per-role, and per-depth counts over a task tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStatistics {
    pub total_tasks: usize,
    pub by_status: HashMap<String, usize>,
    pub by_role: HashMap<String, usize>,
    pub by_depth: HashMap<u32, usize>,
    pub max_depth: u32,
    pub leaf_count: usize,
}

/// The task tree owned by a session.
///
/// Insertion order is preserved so scheduling and rendering are
/// deterministic for a given sequence of operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTree {
    /// Root task id
    pub root_id: String,
    /// All tasks keyed by id
    tasks: HashMap<String, HierarchicalTask>,
    /// Task ids in insertion order
    order: Vec<String>,
}

impl TaskTree {
    /// Create a tree from its root task.
    pub fn new(root: HierarchicalTask) -> Self {
        let root_id = root.id.clone();
        let mut tasks = HashMap::new();
        let order = vec![root_id.clone()];
        tasks.insert(root_id.clone(), root);
        Self {
            root_id,
            tasks,
            order,
        }
    }

    /// Add a task, enforcing parent existence, depth consistency, and
    /// dependency existence.
    pub fn add_task(&mut self, task: HierarchicalTask) -> Result<(), PlannerError> {
        task.validate()?;
        if self.tasks.contains_key(&task.id) {
            return Err(PlannerError::InvalidTask(format!(
                "duplicate task id {}",
                task.id
            )));
        }
        let parent_id = task.parent_id.clone().ok_or_else(|| {
            PlannerError::InvalidTask(format!("task {} has no parent; trees have one root", task.id))
        })?;
        let parent_depth = self
            .tasks
            .get(&parent_id)
            .ok_or_else(|| {
                PlannerError::InvalidTask(format!(
                    "task {} references missing parent {}",
                    task.id, parent_id
                ))
            })?
            .depth;
        if task.depth != parent_depth + 1 {
            return Err(PlannerError::InvalidTask(format!(
                "task {} depth {} does not match parent depth {} + 1",
                task.id, task.depth, parent_depth
            )));
        }
        for dep in &task.dependencies {
            if !self.tasks.contains_key(dep) {
                return Err(PlannerError::InvalidTask(format!(
                    "task {} references missing dependency {}",
                    task.id, dep
                )));
            }
        }
        if let Some(parent) = self.tasks.get_mut(&parent_id) {
            parent.children.push(task.id.clone());
        }
        self.order.push(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&HierarchicalTask> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut HierarchicalTask> {
        self.tasks.get_mut(id)
    }

    pub fn root(&self) -> &HierarchicalTask {
        &self.tasks[&self.root_id]
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// All task ids in insertion order.
    pub fn task_ids(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &HierarchicalTask> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    /// Tasks that are `pending` with every dependency `completed`, in
    /// insertion order.
    pub fn executable_tasks(&self) -> Vec<&HierarchicalTask> {
        self.tasks()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.dependencies.iter().all(|dep| {
                        self.tasks
                            .get(dep)
                            .is_some_and(|d| d.status == TaskStatus::Completed)
                    })
            })
            .collect()
    }

    /// True when every task is in a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.tasks().all(HierarchicalTask::is_terminal)
    }

    /// True when any task is queued, in progress, or verifying.
    pub fn any_in_flight(&self) -> bool {
        self.tasks().any(|t| {
            matches!(
                t.status,
                TaskStatus::Queued | TaskStatus::InProgress | TaskStatus::Verifying
            )
        })
    }

    /// Count tasks by status.
    pub fn count_status(&self, status: TaskStatus) -> usize {
        self.tasks().filter(|t| t.status == status).count()
    }

    /// Compute tree statistics.
    pub fn statistics(&self) -> TreeStatistics {
        let mut stats = TreeStatistics {
            total_tasks: self.tasks.len(),
            ..TreeStatistics::default()
        };
        for task in self.tasks() {
            *stats
                .by_status
                .entry(task.status.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .by_role
                .entry(task.role.as_str().to_string())
                .or_insert(0) += 1;
            *stats.by_depth.entry(task.depth).or_insert(0) += 1;
            stats.max_depth = stats.max_depth.max(task.depth);
            if task.children.is_empty() {
                stats.leaf_count += 1;
            }
        }
        stats
    }

    /// Render an ASCII view of the tree for logs and the CLI.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_node(&self.root_id, "", true, &mut out);
        out
    }

    fn render_node(&self, id: &str, prefix: &str, is_last: bool, out: &mut String) {
        let Some(task) = self.tasks.get(id) else {
            return;
        };
        let connector = if prefix.is_empty() {
            ""
        } else if is_last {
            "└── "
        } else {
            "├── "
        };
        out.push_str(&format!(
            "{}{}[{}] {} ({}, {})\n",
            prefix,
            connector,
            task.status.as_str(),
            task.id,
            task.role.as_str(),
            task.priority.as_str()
        ));
        let child_prefix = if prefix.is_empty() {
            String::new()
        } else if is_last {
            format!("{prefix}    ")
        } else {
            format!("{prefix}│   ")
        };
        let count = task.children.len();
        for (i, child) in task.children.iter().enumerate() {
            let p = if prefix.is_empty() {
                "  ".to_string()
            } else {
                child_prefix.clone()
            };
            self.render_node(child, &p, i + 1 == count, out);
        }
    }
}
