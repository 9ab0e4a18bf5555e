//! Error taxonomies for the MeshSeeks orchestration engine.
//!
//! Each concern carries its own error enum so callers can match on the
//! failure kind without string inspection. Per-task failures are recovered
//! locally by the orchestrator; only root-task failures, excessive-failure
//! signals, and unrecoverable persistence errors surface as session failures.

use thiserror::Error;

/// Errors raised by the agent pool manager.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No worker could be acquired within the request timeout.
    #[error("no agent available: acquisition timed out after {0} ms")]
    AcquireTimeout(u64),

    /// The pool is shutting down and rejects new or queued acquisitions.
    #[error("pool shutting down")]
    ShuttingDown,

    /// A worker exceeded its activity timeout and was marked failed.
    #[error("agent {0} timed out")]
    AgentTimeout(String),

    /// Referenced worker does not exist in the pool.
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// Consecutive release-with-failure events crossed the configured cap.
    #[error("excessive consecutive failures: {0}")]
    ExcessiveFailures(u32),
}

/// Errors raised by task executors (the external code-assistant collaborator).
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The child process failed to spawn or terminated abnormally.
    #[error("execution error: {0}")]
    ExecutionFailed(String),

    /// The per-task deadline elapsed and the child was terminated.
    #[error("task timed out after {0} ms")]
    TaskTimeout(u64),

    /// The executor binary is not available.
    #[error("executor unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the judge system.
#[derive(Debug, Error)]
pub enum JudgeError {
    /// Non-fatal: the verdict failed and rework instructions were produced.
    #[error("rework required for task {0}")]
    ReworkRequired(String),

    /// The verdict history for a task contains too many failures.
    #[error("retries exceeded for task {0}")]
    RetriesExceeded(String),
}

/// Errors raised by the file backend and checkpoint store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Underlying filesystem failure.
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A checkpoint's recomputed checksum did not match the stored one.
    #[error("checksum mismatch for checkpoint {0}")]
    ChecksumMismatch(String),

    /// A checkpoint was written by an incompatible format version.
    #[error("version mismatch: stored {stored}, expected {expected}")]
    VersionMismatch { stored: String, expected: String },

    /// The requested checkpoint, session, or result does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PersistenceError {
    /// Wrap an I/O error with the path it occurred at.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors raised by the hierarchical planner.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// Non-fatal: the task sits at the depth cap and cannot be decomposed.
    #[error("max task depth {0} reached")]
    MaxDepthReached(u32),

    /// The task failed structural validation.
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// A dependency cycle was detected among the given tasks.
    #[error("dependency cycle detected involving task {0}")]
    DependencyCycle(String),
}

/// Errors raised by the session manager.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Referenced session does not exist.
    #[error("session not found: {0}")]
    NotFound(String),

    /// Referenced task does not exist in the session's tree.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// A status transition violated the task or session state machine.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// The session passed its expiry timestamp.
    #[error("session expired: {0}")]
    Expired(String),

    /// A persistence failure that the session could not recover from.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// A planning failure while mutating the session's tree.
    #[error(transparent)]
    Planner(#[from] PlannerError),
}
