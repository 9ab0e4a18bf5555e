//! Task executor port.
//!
//! The executor is the external code-assistant collaborator: given a task
//! and the outputs of its completed dependencies, it produces a
//! [`TaskResult`]. The canonical implementation spawns a child process per
//! task; tests substitute scripted executors.

use async_trait::async_trait;

use crate::domain::errors::ExecutorError;
use crate::domain::models::{ContextStore, HierarchicalTask, TaskResult};

/// Executes one task against an external worker.
///
/// Implementations must reap the worker on every exit path: success,
/// failure, timeout, and cancellation. A worker failure is reported either
/// as `Ok(TaskResult { success: false, .. })` (the worker ran and rejected
/// the task) or as `Err(ExecutorError)` (the worker could not run); the
/// orchestrator folds both into a failed task without ending the session.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute `task`, with `context` holding the results of every
    /// completed dependency keyed by task id.
    async fn execute(
        &self,
        task: &HierarchicalTask,
        context: &ContextStore,
    ) -> Result<TaskResult, ExecutorError>;
}
