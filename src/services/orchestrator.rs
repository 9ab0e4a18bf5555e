//! Swarm orchestrator: the control loop binding planner, pool, judge,
//! session manager, and executor.
//!
//! `run` drives one session until every task is terminal: plan the root,
//! query dependency-ready tasks, dispatch a bounded batch concurrently,
//! verify results through the judge (with rework loops), checkpoint via the
//! session manager, and isolate per-task failures so independents keep
//! running.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::errors::SessionError;
use crate::domain::models::{
    ContextStore, DecompositionStrategy, HierarchicalTask, ReturnMode, SwarmConfig, TaskMetrics,
    TaskPriority, TaskResult, TaskRole, TaskStatus,
};
use crate::domain::ports::TaskExecutor;
use crate::services::agent_pool::{AgentPool, PoolStats};
use crate::services::event_bus::EventBus;
use crate::services::judge::Judge;
use crate::services::planner::{DecomposeInstruction, Planner, PlanningContext};
use crate::services::session_manager::{SessionManager, SessionView};

/// Safety cap on control-loop iterations per run.
const MAX_ITERATIONS: usize = 1000;

/// Sleep between loop passes while work is in flight.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Pseudo worker id recorded on planner-completed root tasks.
const PLANNER_AGENT: &str = "planner";

/// Terminal disposition of one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task completed
    Completed,
    /// The session completed with at least one failed non-root task
    Partial,
    /// The session failed
    Failed,
    /// The session was paused mid-run
    Paused,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }
}

/// Per-task report handed back to callers of the top-level operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskExecutionReport {
    pub task_id: String,
    pub role: String,
    pub status: String,
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metrics: TaskMetrics,
}

/// A planned task spec returned by `analyze_problem`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSpec {
    pub id: String,
    pub role: String,
    pub prompt: String,
    pub dependencies: Vec<String>,
    pub return_mode: ReturnMode,
    pub priority: TaskPriority,
}

/// Outcome of `solve_problem`.
#[derive(Debug, Clone, Serialize)]
pub struct SolveOutcome {
    pub session_id: String,
    pub status: RunStatus,
    pub artifact: String,
    pub task_reports: Vec<TaskExecutionReport>,
}

/// Snapshot returned by the `status` operation; always succeeds.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub session_id: Option<String>,
    pub session_status: Option<String>,
    pub tasks_by_status: HashMap<String, usize>,
    pub pool: PoolStats,
    pub recent_results: Vec<TaskExecutionReport>,
}

#[derive(Debug, Clone, Copy)]
struct RunOptions {
    strategy: DecompositionStrategy,
    max_concurrent: usize,
}

/// The top-level control loop over one session at a time.
pub struct Orchestrator {
    config: SwarmConfig,
    sessions: Arc<SessionManager>,
    pool: Arc<AgentPool>,
    planner: Planner,
    judge: Arc<Judge>,
    executor: Arc<dyn TaskExecutor>,
}

impl Orchestrator {
    pub fn new(
        config: SwarmConfig,
        sessions: Arc<SessionManager>,
        pool: Arc<AgentPool>,
        judge: Arc<Judge>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        let planner = Planner::new(&config);
        Self {
            config,
            sessions,
            pool,
            planner,
            judge,
            executor,
        }
    }

    /// Convenience constructor wiring fresh collaborators around a shared
    /// event bus.
    pub fn bootstrap(
        config: SwarmConfig,
        store: Arc<crate::infrastructure::storage::checkpoint_store::CheckpointStore>,
        executor: Arc<dyn TaskExecutor>,
        events: EventBus,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(
            config.clone(),
            store,
            events.clone(),
        ));
        let pool = Arc::new(AgentPool::new(&config, events));
        let judge = Arc::new(Judge::new(&config));
        Self::new(config, sessions, pool, judge, executor)
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn pool(&self) -> &Arc<AgentPool> {
        &self.pool
    }

    /// Drive a session to a terminal state with the configured strategy.
    pub async fn run(&self, session_id: &str) -> Result<RunStatus, SessionError> {
        self.run_with_options(
            session_id,
            RunOptions {
                strategy: self.config.default_strategy,
                max_concurrent: self.config.max_concurrent_agents,
            },
        )
        .await
    }

    async fn run_with_options(
        &self,
        session_id: &str,
        options: RunOptions,
    ) -> Result<RunStatus, SessionError> {
        self.sessions.start_session(session_id).await?;
        info!(session_id, strategy = %options.strategy.as_str(), "Orchestrator run started");

        for iteration in 0..MAX_ITERATIONS {
            let view = self.sessions.session_view(session_id).await?;
            match view.session.status {
                crate::domain::models::SessionStatus::Paused => {
                    info!(session_id, iteration, "Run short-circuited: session paused");
                    return Ok(RunStatus::Paused);
                }
                crate::domain::models::SessionStatus::Failed => return Ok(RunStatus::Failed),
                crate::domain::models::SessionStatus::Completed => {
                    return Ok(finish_status(&view));
                }
                _ => {}
            }

            if self.pool.take_excessive_failures_signal() {
                warn!(session_id, "Excessive worker failures; pausing session");
                self.sessions
                    .pause_session(session_id, Some("excessive consecutive worker failures".into()))
                    .await?;
                return Ok(RunStatus::Paused);
            }

            // Root still pending: decompose it first.
            if view.tree.root().status == TaskStatus::Pending {
                self.plan_root(session_id, &view, options.strategy).await?;
                continue;
            }

            let executable: Vec<HierarchicalTask> = view
                .tree
                .executable_tasks()
                .into_iter()
                .cloned()
                .collect();

            if executable.is_empty() {
                if view.tree.all_terminal() {
                    let status = finish_status(&view);
                    self.sessions.complete_session(session_id).await?;
                    info!(session_id, status = %status.as_str(), "Run finished");
                    return Ok(status);
                }
                if !view.tree.any_in_flight() {
                    // Non-terminal tasks exist but nothing can run and
                    // nothing is running: the tree is stuck.
                    let reason = "task tree is stuck: no executable or in-flight tasks remain";
                    self.sessions.fail_session(session_id, reason).await?;
                    return Ok(RunStatus::Failed);
                }
                tokio::time::sleep(IDLE_WAIT).await;
                continue;
            }

            let batch: Vec<HierarchicalTask> = executable
                .into_iter()
                .take(options.max_concurrent.max(1))
                .collect();
            debug!(session_id, iteration, batch = batch.len(), "Dispatching batch");
            for task in &batch {
                self.sessions.mark_task_queued(session_id, &task.id).await?;
            }
            let dispatches = batch
                .into_iter()
                .map(|task| self.dispatch_task(session_id, task));
            futures::future::join_all(dispatches).await;
        }

        warn!(session_id, "Iteration safety cap reached");
        self.sessions
            .fail_session(session_id, "iteration safety cap reached")
            .await?;
        Ok(RunStatus::Failed)
    }

    /// Decompose the root task and complete it with a planning summary so
    /// its children become dependency-ready.
    async fn plan_root(
        &self,
        session_id: &str,
        view: &SessionView,
        strategy: DecompositionStrategy,
    ) -> Result<(), SessionError> {
        let root = view.tree.root().clone();
        let context = PlanningContext::new(
            &view.session.config,
            view.tree.task_ids().cloned().collect(),
        );
        let instruction = DecomposeInstruction {
            strategy,
            ..DecomposeInstruction::default()
        };
        let plan = self.planner.decompose(&root, &instruction, &context);

        self.sessions
            .mark_task_started(session_id, &root.id, PLANNER_AGENT)
            .await?;

        if plan.subtasks.is_empty() {
            warn!(
                session_id,
                max_depth_reached = plan.max_depth_reached,
                "Root decomposition produced no subtasks"
            );
            self.sessions
                .complete_task(
                    session_id,
                    &root.id,
                    TaskResult::success("no decomposition possible; nothing to execute"),
                )
                .await?;
            return Ok(());
        }

        let summary = plan
            .subtasks
            .iter()
            .map(|t| format!("{} ({})", t.id, t.role.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        self.sessions
            .add_subtasks(session_id, plan.subtasks)
            .await?;
        self.sessions
            .complete_task(
                session_id,
                &root.id,
                TaskResult::success(format!("decomposed into subtasks: {summary}")),
            )
            .await?;
        Ok(())
    }

    /// One task's dispatch flow. All failure paths fail only this task.
    async fn dispatch_task(&self, session_id: &str, task: HierarchicalTask) {
        let agent_id = match self
            .pool
            .acquire(task.role, task.priority, Some(task.id.clone()), None)
            .await
        {
            Ok(agent_id) => agent_id,
            Err(e) => {
                warn!(session_id, task_id = %task.id, error = %e, "Worker acquisition failed");
                let _ = self
                    .sessions
                    .fail_task(session_id, &task.id, format!("NO_AGENT: {e}"))
                    .await;
                return;
            }
        };

        if let Some(record) = self
            .pool
            .agent_snapshots()
            .await
            .into_iter()
            .find(|a| a.id == agent_id)
        {
            let _ = self.sessions.register_agent(session_id, record).await;
        }

        if let Err(e) = self
            .sessions
            .mark_task_started(session_id, &task.id, &agent_id)
            .await
        {
            warn!(session_id, task_id = %task.id, error = %e, "Could not start task");
            let _ = self.pool.release(&agent_id, false).await;
            let _ = self.sessions.remove_agent(session_id, &agent_id).await;
            return;
        }

        let context = self
            .sessions
            .dependency_context(session_id, &task.id)
            .await
            .unwrap_or_default();
        let result = self.execute_with_deadline(&task, &context).await;

        let success = self
            .settle_task(session_id, &task, result)
            .await
            .unwrap_or(false);
        let _ = self.pool.release(&agent_id, success).await;
        let _ = self.sessions.remove_agent(session_id, &agent_id).await;
    }

    async fn execute_with_deadline(
        &self,
        task: &HierarchicalTask,
        context: &ContextStore,
    ) -> TaskResult {
        let deadline = Duration::from_millis(self.config.agent_timeout_ms.max(1));
        match tokio::time::timeout(deadline, self.executor.execute(task, context)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => TaskResult::failure(format!("EXECUTION_ERROR: {e}")),
            Err(_) => TaskResult::failure(format!(
                "TASK_TIMEOUT: exceeded {} ms",
                self.config.agent_timeout_ms
            )),
        }
    }

    /// Verify, complete, rework, or fail a task after execution. Returns
    /// whether the worker release should count as a success.
    async fn settle_task(
        &self,
        session_id: &str,
        task: &HierarchicalTask,
        result: TaskResult,
    ) -> Result<bool, SessionError> {
        let judged = self.judge.is_enabled() && task.role != TaskRole::Planner;
        if judged {
            self.sessions
                .mark_task_verifying(session_id, &task.id)
                .await?;
            let verdict = self.judge.verify(task, &result, None).await;
            self.sessions.record_judge_verdict(session_id, &verdict).await;

            if !verdict.passed {
                let exceeded = self.judge.has_exceeded_retries(&task.id).await;
                if verdict.requires_rework() && task.retry_count < task.max_retries && !exceeded {
                    debug!(session_id, task_id = %task.id, "Judge rejected; task sent to rework");
                    self.sessions
                        .rework_task(session_id, &task.id, verdict.rework_instructions)
                        .await?;
                    return Ok(false);
                }
                let reason = if exceeded || task.retry_count >= task.max_retries {
                    format!(
                        "RETRIES_EXCEEDED: judge rejected after {} attempts",
                        task.retry_count + 1
                    )
                } else {
                    format!(
                        "judge rejected result with score {:.2}",
                        verdict.overall_score
                    )
                };
                self.sessions.fail_task(session_id, &task.id, reason).await?;
                return Ok(false);
            }
        }

        if result.success {
            self.sessions
                .complete_task(session_id, &task.id, result)
                .await?;
            self.auto_decompose(session_id, task).await;
            Ok(true)
        } else {
            let error = result
                .error
                .clone()
                .unwrap_or_else(|| "task reported failure".to_string());
            self.sessions.fail_task(session_id, &task.id, error).await?;
            Ok(false)
        }
    }

    /// Plan children for a freshly completed task when the auto-decompose
    /// rule fires.
    async fn auto_decompose(&self, session_id: &str, task: &HierarchicalTask) {
        if !self.planner.should_auto_decompose(task) {
            return;
        }
        let Ok(view) = self.sessions.session_view(session_id).await else {
            return;
        };
        let context = PlanningContext::new(
            &view.session.config,
            view.tree.task_ids().cloned().collect(),
        );
        let plan = self.planner.decompose(
            task,
            &DecomposeInstruction {
                strategy: view.session.config.default_strategy,
                ..DecomposeInstruction::default()
            },
            &context,
        );
        if plan.subtasks.is_empty() {
            return;
        }
        info!(
            session_id,
            task_id = %task.id,
            children = plan.subtasks.len(),
            "Auto-decomposing completed task"
        );
        if let Err(e) = self.sessions.add_subtasks(session_id, plan.subtasks).await {
            warn!(session_id, task_id = %task.id, error = %e, "Auto-decompose failed");
        }
    }

    /// Plan a prompt without executing anything.
    pub async fn analyze_problem(&self, prompt: &str, work_folder: &str) -> Vec<TaskSpec> {
        let root = HierarchicalTask::new("analysis-root", prompt)
            .with_role(TaskRole::Planner)
            .with_work_folder(work_folder);
        let context = PlanningContext::new(&self.config, std::iter::once(root.id.clone()).collect());
        let plan = self
            .planner
            .decompose(&root, &DecomposeInstruction::default(), &context);
        plan.subtasks
            .into_iter()
            .map(|t| TaskSpec {
                dependencies: t
                    .dependencies
                    .iter()
                    .filter(|d| *d != &root.id)
                    .cloned()
                    .collect(),
                id: t.id,
                role: t.role.as_str().to_string(),
                prompt: t.prompt,
                return_mode: t.return_mode,
                priority: t.priority,
            })
            .collect()
    }

    /// Execute an externally supplied task list and report per-task
    /// results. Dependency ids are validated and cycles rejected up front.
    pub async fn execute_tasks(
        &self,
        tasks: Vec<HierarchicalTask>,
        max_concurrent: Option<usize>,
    ) -> Result<Vec<TaskExecutionReport>, SessionError> {
        Planner::validate_task_list(&tasks)?;
        let session = self
            .sessions
            .create_session_from_tasks("execute-tasks", tasks, ".")
            .await?;
        self.run_with_options(
            &session.id,
            RunOptions {
                strategy: self.config.default_strategy,
                max_concurrent: max_concurrent.unwrap_or(self.config.max_concurrent_agents),
            },
        )
        .await?;
        // The synthetic root is excluded from task reports already
        self.task_reports(&session.id).await
    }

    /// Decompose, execute, and synthesize a final artifact for a prompt.
    pub async fn solve_problem(
        &self,
        prompt: &str,
        work_folder: &str,
        approach: Option<DecompositionStrategy>,
        return_summary: bool,
    ) -> Result<SolveOutcome, SessionError> {
        let session = self
            .sessions
            .create_session(prompt, "", prompt, work_folder)
            .await?;
        let status = self
            .run_with_options(
                &session.id,
                RunOptions {
                    strategy: approach.unwrap_or(self.config.default_strategy),
                    max_concurrent: self.config.max_concurrent_agents,
                },
            )
            .await?;

        let view = self.sessions.session_view(&session.id).await?;
        let mut artifact = String::new();
        for task in view.tree.tasks() {
            if task.status != TaskStatus::Completed || task.id == view.tree.root_id {
                continue;
            }
            if let Ok(Some(result)) = self.sessions.get_context(&session.id, &task.id).await {
                let text = if return_summary {
                    result.summary_or_output().to_string()
                } else {
                    result.output.clone()
                };
                if !text.is_empty() {
                    artifact.push_str(&format!("## {} ({})\n{}\n\n", task.id, task.role.as_str(), text));
                }
            }
        }

        Ok(SolveOutcome {
            session_id: session.id.clone(),
            status: match status {
                RunStatus::Paused => RunStatus::Failed,
                other => other,
            },
            artifact,
            task_reports: self.task_reports(&session.id).await?,
        })
    }

    /// Current status snapshot; never fails.
    pub async fn status(&self) -> StatusReport {
        let pool = self.pool.stats().await;
        let Some(session) = self.sessions.get_active_session().await else {
            return StatusReport {
                session_id: None,
                session_status: None,
                tasks_by_status: HashMap::new(),
                pool,
                recent_results: Vec::new(),
            };
        };
        let tasks_by_status = session
            .metrics
            .tasks_by_status
            .clone();
        let recent_results = self
            .task_reports(&session.id)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.status == TaskStatus::Completed.as_str())
            .rev()
            .take(10)
            .collect();
        StatusReport {
            session_id: Some(session.id.clone()),
            session_status: Some(session.status.as_str().to_string()),
            tasks_by_status,
            pool,
            recent_results,
        }
    }

    /// Pause a running session (forces a checkpoint).
    pub async fn pause_session(
        &self,
        session_id: &str,
        reason: Option<String>,
    ) -> Result<Option<String>, SessionError> {
        self.sessions.pause_session(session_id, reason).await
    }

    /// Resume a session from a checkpoint and drive it to completion.
    pub async fn resume_session(
        &self,
        session_id: &str,
        checkpoint_id: Option<String>,
        reset_failed_tasks: bool,
    ) -> Result<RunStatus, SessionError> {
        self.sessions
            .resume_session(session_id, checkpoint_id, reset_failed_tasks)
            .await?;
        self.run(session_id).await
    }

    /// Shut down the pool and checkpoint live sessions.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        self.sessions.shutdown().await;
    }

    async fn task_reports(&self, session_id: &str) -> Result<Vec<TaskExecutionReport>, SessionError> {
        let view = self.sessions.session_view(session_id).await?;
        let mut reports = Vec::new();
        for task in view.tree.tasks() {
            if task.id == view.tree.root_id {
                continue;
            }
            let result = self
                .sessions
                .get_context(session_id, &task.id)
                .await?
                .unwrap_or_default();
            reports.push(TaskExecutionReport {
                task_id: task.id.clone(),
                role: task.role.as_str().to_string(),
                status: task.status.as_str().to_string(),
                success: task.status == TaskStatus::Completed,
                output: result.output,
                error: result.error,
                metrics: result.metrics,
            });
        }
        Ok(reports)
    }
}

fn finish_status(view: &SessionView) -> RunStatus {
    let root_failed = view.tree.root().status == TaskStatus::Failed;
    if root_failed {
        return RunStatus::Failed;
    }
    let failed = view.tree.count_status(TaskStatus::Failed)
        + view.tree.count_status(TaskStatus::Cancelled);
    if failed == 0 {
        RunStatus::Completed
    } else {
        RunStatus::Partial
    }
}
