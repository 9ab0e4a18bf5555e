//! Configuration model for the orchestration engine.
//!
//! Every session snapshots a [`SwarmConfig`] at creation so later
//! configuration changes never affect running sessions.

use serde::{Deserialize, Serialize};

/// Strategy governing dependency synthesis during decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionStrategy {
    /// Each subtask depends on its immediate predecessor
    Sequential,
    /// No cross-subtask dependencies
    Parallel,
    /// Role-based layering: implementation after analysis, testing after
    /// implementation, documentation last
    Hybrid,
    /// Four phases; each task depends on every prior-phase subtask
    Phased,
}

impl Default for DecompositionStrategy {
    fn default() -> Self {
        Self::Hybrid
    }
}

impl DecompositionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Hybrid => "hybrid",
            Self::Phased => "phased",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sequential" => Some(Self::Sequential),
            "parallel" => Some(Self::Parallel),
            "hybrid" => Some(Self::Hybrid),
            "phased" => Some(Self::Phased),
            _ => None,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SwarmConfig {
    /// Maximum tasks dispatched concurrently per loop iteration
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,

    /// Maximum depth of the task tree
    #[serde(default = "default_max_task_depth")]
    pub max_task_depth: u32,

    /// Whether completed results pass through the judge
    #[serde(default = "default_enable_judge")]
    pub enable_judge: bool,

    /// Overall score a verdict must reach to pass
    #[serde(default = "default_judge_pass_threshold")]
    pub judge_pass_threshold: f64,

    /// Maximum judge-driven rework attempts per task
    #[serde(default = "default_max_judge_retries")]
    pub max_judge_retries: u32,

    /// Auto-checkpoint cadence in milliseconds
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,

    /// Per-task execution deadline in milliseconds
    #[serde(default = "default_agent_timeout_ms")]
    pub agent_timeout_ms: u64,

    /// Session expiry horizon in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Base directory for persisted session state; a leading `~` expands to
    /// the home directory
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,

    /// Oldest checkpoints beyond this count are trimmed per session
    #[serde(default = "default_max_checkpoints_per_session")]
    pub max_checkpoints_per_session: usize,

    /// Whether checkpoints are written gzip-compressed
    #[serde(default)]
    pub compress_checkpoints: bool,

    /// Complexity score at which completed tasks auto-decompose
    #[serde(default = "default_auto_decompose_threshold")]
    pub auto_decompose_threshold: u32,

    /// Default dependency-synthesis strategy
    #[serde(default)]
    pub default_strategy: DecompositionStrategy,

    /// Maximum subtasks emitted per decomposition
    #[serde(default = "default_max_tasks_per_level")]
    pub max_tasks_per_level: usize,

    /// Confidence below which a verdict is flagged for human approval
    #[serde(default = "default_human_approval_threshold")]
    pub require_human_approval_threshold: f64,

    /// Agent pool bounds and scaling behavior
    #[serde(default)]
    pub pool: PoolConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Executor subprocess configuration
    #[serde(default)]
    pub executor: ExecutorConfig,
}

const fn default_max_concurrent_agents() -> usize {
    100
}

const fn default_max_task_depth() -> u32 {
    5
}

const fn default_enable_judge() -> bool {
    true
}

const fn default_judge_pass_threshold() -> f64 {
    0.8
}

const fn default_max_judge_retries() -> u32 {
    2
}

const fn default_checkpoint_interval_ms() -> u64 {
    300_000
}

const fn default_agent_timeout_ms() -> u64 {
    3_600_000
}

const fn default_session_timeout_ms() -> u64 {
    604_800_000
}

fn default_checkpoint_dir() -> String {
    "~/.meshseeks/sessions".to_string()
}

const fn default_max_checkpoints_per_session() -> usize {
    100
}

const fn default_auto_decompose_threshold() -> u32 {
    50
}

const fn default_max_tasks_per_level() -> usize {
    100
}

const fn default_human_approval_threshold() -> f64 {
    0.5
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_concurrent_agents(),
            max_task_depth: default_max_task_depth(),
            enable_judge: default_enable_judge(),
            judge_pass_threshold: default_judge_pass_threshold(),
            max_judge_retries: default_max_judge_retries(),
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            agent_timeout_ms: default_agent_timeout_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            checkpoint_dir: default_checkpoint_dir(),
            max_checkpoints_per_session: default_max_checkpoints_per_session(),
            compress_checkpoints: false,
            auto_decompose_threshold: default_auto_decompose_threshold(),
            default_strategy: DecompositionStrategy::default(),
            max_tasks_per_level: default_max_tasks_per_level(),
            require_human_approval_threshold: default_human_approval_threshold(),
            pool: PoolConfig::default(),
            logging: LoggingConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

/// Agent pool bounds and scaling behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PoolConfig {
    /// The pool never shrinks below this many workers
    #[serde(default = "default_min_agents")]
    pub min_agents: usize,

    /// The pool never grows beyond this many workers
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,

    /// Workers spawned at startup
    #[serde(default = "default_initial_agents")]
    pub initial_agents: usize,

    /// Queue depth that triggers a scale-up
    #[serde(default = "default_scale_up_threshold")]
    pub scale_up_threshold: usize,

    /// Idle time (ms) after which a worker is a scale-down victim
    #[serde(default = "default_scale_down_threshold_ms")]
    pub scale_down_threshold_ms: u64,

    /// Health-check ticker cadence in milliseconds
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// Consecutive release-failures that raise the excessive-failures signal
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Minimum time between scale events in milliseconds
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Default acquisition timeout in milliseconds
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

const fn default_min_agents() -> usize {
    1
}

const fn default_max_agents() -> usize {
    500
}

const fn default_initial_agents() -> usize {
    1
}

const fn default_scale_up_threshold() -> usize {
    10
}

const fn default_scale_down_threshold_ms() -> u64 {
    60_000
}

const fn default_health_check_interval_ms() -> u64 {
    30_000
}

const fn default_max_consecutive_failures() -> u32 {
    5
}

const fn default_cooldown_ms() -> u64 {
    5_000
}

const fn default_acquire_timeout_ms() -> u64 {
    60_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_agents: default_min_agents(),
            max_agents: default_max_agents(),
            initial_agents: default_initial_agents(),
            scale_up_threshold: default_scale_up_threshold(),
            scale_down_threshold_ms: default_scale_down_threshold_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
            cooldown_ms: default_cooldown_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// External code-assistant subprocess configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutorConfig {
    /// Path to the assistant executable (resolved via PATH when bare)
    #[serde(default = "default_assistant_path")]
    pub assistant_path: String,

    /// Extra arguments appended before the prompt flag
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_assistant_path() -> String {
    "claude".to_string()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            assistant_path: default_assistant_path(),
            extra_args: Vec::new(),
        }
    }
}
