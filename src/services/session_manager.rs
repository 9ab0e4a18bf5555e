//! Session manager.
//!
//! Owns every session's task tree, context store, and registered-agent
//! ledger. All mutation flows through this manager's lock, so per-task
//! status transitions are totally ordered. Emits lifecycle events, keeps
//! metrics current, and drives the auto-checkpoint ticker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::errors::{PersistenceError, SessionError};
use crate::domain::models::{
    generate_task_id, AgentRecord, CheckpointTrigger, ContextStore, HierarchicalTask, JudgeVerdict,
    SwarmConfig, SwarmSession, TaskPriority, TaskResult, TaskRole, TaskStatus, TaskTree,
};
use crate::infrastructure::storage::checkpoint_store::{
    CheckpointOptions, CheckpointOutcome, CheckpointStore, RestoreOptions,
};
use crate::services::event_bus::{EventBus, SwarmEvent};

/// A read-only snapshot of one session's state.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub session: SwarmSession,
    pub tree: TaskTree,
}

struct SessionEntry {
    session: SwarmSession,
    tree: TaskTree,
    context: ContextStore,
    agents: HashMap<String, AgentRecord>,
}

impl SessionEntry {
    fn refresh_metrics(&mut self) {
        let stats = self.tree.statistics();
        self.session.metrics.total_tasks = stats.total_tasks;
        self.session.metrics.tasks_by_status = stats.by_status;
        self.session.metrics.tasks_by_role = stats.by_role;
        self.session.metrics.tasks_by_depth = stats.by_depth;
    }

    fn agent_snapshots(&self) -> Vec<AgentRecord> {
        let mut agents: Vec<AgentRecord> = self.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }
}

/// Lifecycle management for sessions and their task trees.
pub struct SessionManager {
    config: SwarmConfig,
    store: Arc<CheckpointStore>,
    events: EventBus,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    active_session_id: RwLock<Option<String>>,
    auto_checkpoint_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(config: SwarmConfig, store: Arc<CheckpointStore>, events: EventBus) -> Self {
        Self {
            config,
            store,
            events,
            sessions: RwLock::new(HashMap::new()),
            active_session_id: RwLock::new(None),
            auto_checkpoint_handle: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<CheckpointStore> {
        &self.store
    }

    /// Create a session whose root task carries the user prompt. The root
    /// is a planner-role task: the orchestrator decomposes it on the first
    /// loop pass.
    pub async fn create_session(
        &self,
        name: &str,
        description: &str,
        prompt: &str,
        work_folder: &str,
    ) -> Result<SwarmSession, SessionError> {
        let root_id = generate_task_id(&std::collections::HashSet::new());
        let root = HierarchicalTask::new(&root_id, prompt)
            .with_role(TaskRole::Planner)
            .with_priority(TaskPriority::High)
            .with_work_folder(work_folder)
            .with_max_retries(self.config.max_judge_retries);
        let tree = TaskTree::new(root);
        self.install_session(name, description, tree).await
    }

    /// Create a session from an externally supplied task list. The tasks
    /// become depth-1 children of a synthetic, already-completed root, so
    /// their mutual dependencies alone govern scheduling.
    pub async fn create_session_from_tasks(
        &self,
        name: &str,
        tasks: Vec<HierarchicalTask>,
        work_folder: &str,
    ) -> Result<SwarmSession, SessionError> {
        let root_id = generate_task_id(&std::collections::HashSet::new());
        let mut root = HierarchicalTask::new(&root_id, format!("coordinate: {name}"))
            .with_role(TaskRole::Planner)
            .with_work_folder(work_folder);
        root.force_status(TaskStatus::Completed, "synthetic root for external task list");
        let mut tree = TaskTree::new(root);

        // Insert in dependency order so forward references in the supplied
        // list do not fail tree validation.
        let mut pending: Vec<HierarchicalTask> = tasks
            .into_iter()
            .map(|mut task| {
                task.parent_id = Some(root_id.clone());
                task.depth = 1;
                if task.work_folder == "." {
                    task.work_folder = work_folder.to_string();
                }
                task
            })
            .collect();
        while !pending.is_empty() {
            let mut progressed = false;
            let mut rest = Vec::new();
            for task in pending {
                if task.dependencies.iter().all(|d| tree.contains(d)) {
                    tree.add_task(task)?;
                    progressed = true;
                } else {
                    rest.push(task);
                }
            }
            if !progressed {
                return Err(crate::domain::errors::PlannerError::DependencyCycle(
                    rest[0].id.clone(),
                )
                .into());
            }
            pending = rest;
        }
        self.install_session(name, "", tree).await
    }

    async fn install_session(
        &self,
        name: &str,
        description: &str,
        tree: TaskTree,
    ) -> Result<SwarmSession, SessionError> {
        let session = SwarmSession::new(name, description, &tree.root_id, self.config.clone());
        let mut entry = SessionEntry {
            session,
            tree,
            context: ContextStore::new(),
            agents: HashMap::new(),
        };
        entry.refresh_metrics();

        self.store.save_session(&entry.session).await?;
        self.store
            .save_task_tree(&entry.session.id, &entry.tree)
            .await?;

        let session = entry.session.clone();
        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(session.id.clone(), entry);
        }
        {
            let mut active = self.active_session_id.write().await;
            if active.is_none() {
                *active = Some(session.id.clone());
            }
        }
        info!(session_id = %session.id, name = %session.name, "Session created");
        self.events.publish(SwarmEvent::SessionCreated {
            session_id: session.id.clone(),
        });
        Ok(session)
    }

    /// Move a session to active.
    pub async fn start_session(&self, session_id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let entry = get_entry_mut(&mut sessions, session_id)?;
        if entry.session.is_terminal() {
            return Err(invalid_transition(&entry.session, "active"));
        }
        entry
            .session
            .update_status(crate::domain::models::SessionStatus::Active);
        let session = entry.session.clone();
        drop(sessions);

        self.persist_session(&session).await;
        self.events.publish(SwarmEvent::SessionStarted {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Clone a session's current state.
    pub async fn session_view(&self, session_id: &str) -> Result<SessionView, SessionError> {
        let sessions = self.sessions.read().await;
        let entry = get_entry(&sessions, session_id)?;
        Ok(SessionView {
            session: entry.session.clone(),
            tree: entry.tree.clone(),
        })
    }

    /// The most recently created session still tracked as active.
    pub async fn get_active_session(&self) -> Option<SwarmSession> {
        let active = self.active_session_id.read().await.clone()?;
        let sessions = self.sessions.read().await;
        sessions.get(&active).map(|e| e.session.clone())
    }

    /// All in-memory sessions.
    pub async fn list_sessions(&self) -> Vec<SwarmSession> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<SwarmSession> = sessions.values().map(|e| e.session.clone()).collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    /// Add planner-produced subtasks to a session's tree.
    pub async fn add_subtasks(
        &self,
        session_id: &str,
        subtasks: Vec<HierarchicalTask>,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let entry = get_entry_mut(&mut sessions, session_id)?;
        if entry.session.is_terminal() {
            return Err(invalid_transition(&entry.session, "add tasks"));
        }
        for subtask in subtasks {
            entry.tree.add_task(subtask)?;
        }
        entry.refresh_metrics();
        let (session, tree) = (entry.session.clone(), entry.tree.clone());
        drop(sessions);

        self.persist_tree(&session.id, &tree).await;
        self.persist_session(&session).await;
        Ok(())
    }

    /// Mark a task queued for dispatch.
    pub async fn mark_task_queued(
        &self,
        session_id: &str,
        task_id: &str,
    ) -> Result<(), SessionError> {
        self.transition_task(session_id, task_id, TaskStatus::Queued, None)
            .await
            .map(|_| ())
    }

    /// Mark a task in progress under the given worker.
    pub async fn mark_task_started(
        &self,
        session_id: &str,
        task_id: &str,
        agent_id: &str,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let entry = get_entry_mut(&mut sessions, session_id)?;
        let task = entry
            .tree
            .get_mut(task_id)
            .ok_or_else(|| SessionError::TaskNotFound(task_id.to_string()))?;
        task.transition_to(TaskStatus::InProgress)
            .map_err(|(from, to)| SessionError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })?;
        task.assigned_agent = Some(agent_id.to_string());
        entry.refresh_metrics();
        drop(sessions);

        self.events.publish(SwarmEvent::TaskStarted {
            session_id: session_id.to_string(),
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
        });
        Ok(())
    }

    /// Mark a task as undergoing verification.
    pub async fn mark_task_verifying(
        &self,
        session_id: &str,
        task_id: &str,
    ) -> Result<(), SessionError> {
        self.transition_task(session_id, task_id, TaskStatus::Verifying, None)
            .await
            .map(|_| ())
    }

    /// Complete a task and store its result in the context store.
    pub async fn complete_task(
        &self,
        session_id: &str,
        task_id: &str,
        result: TaskResult,
    ) -> Result<(), SessionError> {
        self.transition_task(session_id, task_id, TaskStatus::Completed, Some(result))
            .await
            .map(|_| ())
    }

    /// Fail a task, recording the error in the session log.
    pub async fn fail_task(
        &self,
        session_id: &str,
        task_id: &str,
        error: impl Into<String>,
    ) -> Result<(), SessionError> {
        let error = error.into();
        self.transition_task(
            session_id,
            task_id,
            TaskStatus::Failed,
            Some(TaskResult::failure(error)),
        )
        .await
        .map(|_| ())
    }

    /// Send a verifying task back to pending with the judge's rework
    /// prompt.
    pub async fn rework_task(
        &self,
        session_id: &str,
        task_id: &str,
        rework_prompt: Option<String>,
    ) -> Result<u32, SessionError> {
        let mut sessions = self.sessions.write().await;
        let entry = get_entry_mut(&mut sessions, session_id)?;
        let task = entry
            .tree
            .get_mut(task_id)
            .ok_or_else(|| SessionError::TaskNotFound(task_id.to_string()))?;
        task.rework(rework_prompt)
            .map_err(|(from, to)| SessionError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })?;
        let retry_count = task.retry_count;
        entry.refresh_metrics();
        let (session, tree) = (entry.session.clone(), entry.tree.clone());
        drop(sessions);

        self.persist_tree(&session.id, &tree).await;
        self.events.publish(SwarmEvent::TaskRework {
            session_id: session_id.to_string(),
            task_id: task_id.to_string(),
            retry_count,
        });
        Ok(retry_count)
    }

    /// Status transition workhorse: validates against the task state
    /// machine, updates metrics, stores results, emits events, and forces a
    /// checkpoint when the root task reaches a terminal state.
    async fn transition_task(
        &self,
        session_id: &str,
        task_id: &str,
        new_status: TaskStatus,
        result: Option<TaskResult>,
    ) -> Result<HierarchicalTask, SessionError> {
        let (task, session, tree, root_terminal) = {
            let mut sessions = self.sessions.write().await;
            let entry = get_entry_mut(&mut sessions, session_id)?;
            if entry.session.is_terminal() {
                return Err(invalid_transition(&entry.session, new_status.as_str()));
            }
            let task = entry
                .tree
                .get_mut(task_id)
                .ok_or_else(|| SessionError::TaskNotFound(task_id.to_string()))?;
            task.transition_to(new_status)
                .map_err(|(from, to)| SessionError::InvalidTransition {
                    from: from.as_str().to_string(),
                    to: to.as_str().to_string(),
                })?;
            let task = task.clone();
            entry.refresh_metrics();

            match new_status {
                TaskStatus::Completed => {
                    if let Some(result) = &result {
                        if let Some(ms) = result.metrics.execution_time_ms {
                            entry.session.metrics.record_execution_ms(ms);
                        }
                        entry.context.insert(task_id.to_string(), result.clone());
                    }
                }
                TaskStatus::Failed => {
                    let message = result
                        .as_ref()
                        .and_then(|r| r.error.clone())
                        .unwrap_or_else(|| "task failed".to_string());
                    entry.session.push_error(Some(task_id.to_string()), message);
                }
                _ => {}
            }

            let root_terminal = task_id == entry.tree.root_id && new_status.is_terminal();
            (
                task,
                entry.session.clone(),
                entry.tree.clone(),
                root_terminal,
            )
        };

        if let Some(result) = &result {
            if new_status == TaskStatus::Completed {
                if let Err(e) = self.store.save_task_result(session_id, task_id, result).await {
                    warn!(session_id, task_id, error = %e, "Failed to persist task result");
                }
            }
        }
        self.persist_tree(session_id, &tree).await;
        self.persist_session(&session).await;

        match new_status {
            TaskStatus::Completed => {
                self.events.publish(SwarmEvent::TaskCompleted {
                    session_id: session_id.to_string(),
                    task_id: task_id.to_string(),
                });
            }
            TaskStatus::Failed => {
                self.events.publish(SwarmEvent::TaskFailed {
                    session_id: session_id.to_string(),
                    task_id: task_id.to_string(),
                    error: result
                        .as_ref()
                        .and_then(|r| r.error.clone())
                        .unwrap_or_default(),
                });
            }
            _ => {}
        }

        if root_terminal {
            debug!(session_id, "Root task terminal; forcing checkpoint");
            self.create_checkpoint(
                session_id,
                CheckpointOptions {
                    trigger: CheckpointTrigger::Manual,
                    description: Some("root task reached terminal state".to_string()),
                    compress: self.config.compress_checkpoints,
                    include_context: true,
                },
            )
            .await;
        }
        Ok(task)
    }

    /// Fold a judge verdict into the session metrics.
    pub async fn record_judge_verdict(&self, session_id: &str, verdict: &JudgeVerdict) {
        {
            let mut sessions = self.sessions.write().await;
            if let Some(entry) = sessions.get_mut(session_id) {
                if verdict.passed {
                    entry.session.metrics.judge_approvals += 1;
                } else {
                    entry.session.metrics.judge_rejections += 1;
                }
            }
        }
        self.events.publish(SwarmEvent::JudgeVerdict {
            session_id: session_id.to_string(),
            task_id: verdict.task_id.clone(),
            passed: verdict.passed,
            score: verdict.overall_score,
        });
    }

    /// Results of a task's completed dependencies, keyed by task id.
    pub async fn dependency_context(
        &self,
        session_id: &str,
        task_id: &str,
    ) -> Result<ContextStore, SessionError> {
        let sessions = self.sessions.read().await;
        let entry = get_entry(&sessions, session_id)?;
        let task = entry
            .tree
            .get(task_id)
            .ok_or_else(|| SessionError::TaskNotFound(task_id.to_string()))?;
        let mut context = ContextStore::new();
        for dep in &task.dependencies {
            if let Some(result) = entry.context.get(dep) {
                context.insert(dep.clone(), result.clone());
            }
        }
        Ok(context)
    }

    /// Store a task result in the session's context store.
    pub async fn set_context(
        &self,
        session_id: &str,
        task_id: &str,
        result: TaskResult,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let entry = get_entry_mut(&mut sessions, session_id)?;
        entry.context.insert(task_id.to_string(), result);
        Ok(())
    }

    /// Read a task result from the session's context store.
    pub async fn get_context(
        &self,
        session_id: &str,
        task_id: &str,
    ) -> Result<Option<TaskResult>, SessionError> {
        let sessions = self.sessions.read().await;
        let entry = get_entry(&sessions, session_id)?;
        Ok(entry.context.get(task_id).cloned())
    }

    /// Register a worker snapshot in the session's agent ledger.
    pub async fn register_agent(
        &self,
        session_id: &str,
        agent: AgentRecord,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let entry = get_entry_mut(&mut sessions, session_id)?;
        if entry.agents.insert(agent.id.clone(), agent).is_none() {
            entry.session.metrics.agent_registered();
        }
        Ok(())
    }

    /// Remove a worker from the session's agent ledger.
    pub async fn remove_agent(
        &self,
        session_id: &str,
        agent_id: &str,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let entry = get_entry_mut(&mut sessions, session_id)?;
        if entry.agents.remove(agent_id).is_some() {
            entry.session.metrics.agent_removed();
        }
        Ok(())
    }

    /// Pause a session, forcing a checkpoint first so resume has a fresh
    /// snapshot. Returns the checkpoint id when one was written.
    pub async fn pause_session(
        &self,
        session_id: &str,
        reason: Option<String>,
    ) -> Result<Option<String>, SessionError> {
        {
            let sessions = self.sessions.read().await;
            let entry = get_entry(&sessions, session_id)?;
            if entry.session.is_terminal() {
                return Err(invalid_transition(&entry.session, "paused"));
            }
        }

        let outcome = self
            .create_checkpoint(
                session_id,
                CheckpointOptions {
                    trigger: CheckpointTrigger::Manual,
                    description: Some(
                        reason
                            .clone()
                            .unwrap_or_else(|| "session paused".to_string()),
                    ),
                    compress: self.config.compress_checkpoints,
                    include_context: true,
                },
            )
            .await;
        // Checkpoint failures on the pause path are surfaced, not swallowed
        if !outcome.success {
            return Err(SessionError::Persistence(PersistenceError::Serialization(
                outcome
                    .error
                    .unwrap_or_else(|| "checkpoint failed".to_string()),
            )));
        }

        let session = {
            let mut sessions = self.sessions.write().await;
            let entry = get_entry_mut(&mut sessions, session_id)?;
            entry
                .session
                .update_status(crate::domain::models::SessionStatus::Paused);
            entry.session.clone()
        };
        self.persist_session(&session).await;
        info!(session_id, reason = ?reason, "Session paused");
        self.events.publish(SwarmEvent::SessionPaused {
            session_id: session_id.to_string(),
            reason,
        });
        Ok(outcome.checkpoint_id)
    }

    /// Resume a session from a checkpoint (the latest when no id is
    /// given). An unknown checkpoint id surfaces `NotFound`.
    pub async fn resume_session(
        &self,
        session_id: &str,
        checkpoint_id: Option<String>,
        reset_failed_tasks: bool,
    ) -> Result<Vec<String>, SessionError> {
        let outcome = self
            .store
            .restore_checkpoint(
                session_id,
                RestoreOptions {
                    checkpoint_id,
                    reset_failed_tasks,
                    reset_in_progress_tasks: true,
                    validate_checksum: true,
                },
            )
            .await?;

        let mut session = outcome.session;
        session.update_status(crate::domain::models::SessionStatus::Active);
        let entry = SessionEntry {
            session: session.clone(),
            tree: outcome.task_tree,
            context: outcome.context_store,
            agents: outcome
                .agent_states
                .into_iter()
                .map(|a| (a.id.clone(), a))
                .collect(),
        };
        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(session_id.to_string(), entry);
        }
        {
            let mut active = self.active_session_id.write().await;
            *active = Some(session_id.to_string());
        }
        self.persist_session(&session).await;

        info!(
            session_id,
            checkpoint_id = %outcome.checkpoint_id,
            warnings = outcome.warnings.len(),
            "Session resumed"
        );
        self.events.publish(SwarmEvent::SessionResumed {
            session_id: session_id.to_string(),
            checkpoint_id: outcome.checkpoint_id,
        });
        Ok(outcome.warnings)
    }

    /// Mark a session completed.
    pub async fn complete_session(&self, session_id: &str) -> Result<(), SessionError> {
        let session = {
            let mut sessions = self.sessions.write().await;
            let entry = get_entry_mut(&mut sessions, session_id)?;
            if entry.session.is_terminal() {
                return Ok(());
            }
            entry
                .session
                .update_status(crate::domain::models::SessionStatus::Completed);
            entry.session.clone()
        };
        self.persist_session(&session).await;
        info!(session_id, "Session completed");
        self.events.publish(SwarmEvent::SessionCompleted {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Mark a session failed.
    pub async fn fail_session(
        &self,
        session_id: &str,
        reason: impl Into<String>,
    ) -> Result<(), SessionError> {
        let reason = reason.into();
        let session = {
            let mut sessions = self.sessions.write().await;
            let entry = get_entry_mut(&mut sessions, session_id)?;
            if entry.session.is_terminal() {
                return Ok(());
            }
            entry.session.push_error(None, reason.clone());
            entry
                .session
                .update_status(crate::domain::models::SessionStatus::Failed);
            entry.session.clone()
        };
        self.persist_session(&session).await;
        warn!(session_id, reason = %reason, "Session failed");
        self.events.publish(SwarmEvent::SessionFailed {
            session_id: session_id.to_string(),
            reason,
        });
        Ok(())
    }

    /// Write a checkpoint for a session. Failures come back in the outcome
    /// rather than as errors; auto-checkpoint callers log them into the
    /// session error list.
    pub async fn create_checkpoint(
        &self,
        session_id: &str,
        options: CheckpointOptions,
    ) -> CheckpointOutcome {
        let snapshot = {
            let sessions = self.sessions.read().await;
            match sessions.get(session_id) {
                Some(entry) => Some((
                    entry.session.clone(),
                    entry.tree.clone(),
                    entry.agent_snapshots(),
                    entry.context.clone(),
                )),
                None => None,
            }
        };
        let Some((session, tree, agents, context)) = snapshot else {
            return CheckpointOutcome {
                success: false,
                checkpoint_id: None,
                size_bytes: 0,
                error: Some(format!("session not found: {session_id}")),
            };
        };

        let trigger = options.trigger;
        let outcome = self
            .store
            .create_checkpoint(&session, &tree, &agents, &context, options)
            .await;

        if let Some(checkpoint_id) = &outcome.checkpoint_id {
            {
                let mut sessions = self.sessions.write().await;
                if let Some(entry) = sessions.get_mut(session_id) {
                    entry.session.record_checkpoint(checkpoint_id.clone());
                }
            }
            self.events.publish(SwarmEvent::CheckpointCreated {
                session_id: session_id.to_string(),
                checkpoint_id: checkpoint_id.clone(),
                trigger: trigger.as_str().to_string(),
            });
        } else if let Some(error) = &outcome.error {
            let mut sessions = self.sessions.write().await;
            if let Some(entry) = sessions.get_mut(session_id) {
                entry
                    .session
                    .push_error(None, format!("checkpoint failed: {error}"));
            }
        }
        outcome
    }

    /// Spawn the auto-checkpoint ticker over active sessions.
    pub async fn start_auto_checkpoint(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let interval = Duration::from_millis(self.config.checkpoint_interval_ms.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let active_ids: Vec<String> = {
                    let sessions = manager.sessions.read().await;
                    sessions
                        .values()
                        .filter(|e| {
                            e.session.status == crate::domain::models::SessionStatus::Active
                        })
                        .map(|e| e.session.id.clone())
                        .collect()
                };
                for session_id in active_ids {
                    let outcome = manager
                        .create_checkpoint(
                            &session_id,
                            CheckpointOptions {
                                trigger: CheckpointTrigger::Auto,
                                description: None,
                                compress: manager.config.compress_checkpoints,
                                include_context: true,
                            },
                        )
                        .await;
                    if !outcome.success {
                        warn!(session_id = %session_id, error = ?outcome.error, "Auto-checkpoint failed");
                    }
                }
                match manager
                    .store
                    .collect_expired_sessions(chrono::Utc::now())
                    .await
                {
                    Ok(collected) if !collected.is_empty() => {
                        tracing::info!(count = collected.len(), "Garbage-collected expired sessions");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Expired-session sweep failed"),
                }
            }
        });
        let mut slot = self.auto_checkpoint_handle.lock().await;
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Stop the ticker and checkpoint every non-terminal session with a
    /// shutdown trigger.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.auto_checkpoint_handle.lock().await.take() {
            handle.abort();
        }
        let ids: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|e| !e.session.is_terminal())
                .map(|e| e.session.id.clone())
                .collect()
        };
        for session_id in ids {
            self.create_checkpoint(
                &session_id,
                CheckpointOptions {
                    trigger: CheckpointTrigger::Shutdown,
                    description: Some("session manager shutdown".to_string()),
                    compress: self.config.compress_checkpoints,
                    include_context: true,
                },
            )
            .await;
        }
        info!("Session manager shut down");
    }

    async fn persist_session(&self, session: &SwarmSession) {
        if let Err(e) = self.store.save_session(session).await {
            warn!(session_id = %session.id, error = %e, "Failed to persist session");
        }
    }

    async fn persist_tree(&self, session_id: &str, tree: &TaskTree) {
        if let Err(e) = self.store.save_task_tree(session_id, tree).await {
            warn!(session_id, error = %e, "Failed to persist task tree");
        }
    }
}

fn get_entry<'a>(
    sessions: &'a HashMap<String, SessionEntry>,
    session_id: &str,
) -> Result<&'a SessionEntry, SessionError> {
    sessions
        .get(session_id)
        .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
}

fn get_entry_mut<'a>(
    sessions: &'a mut HashMap<String, SessionEntry>,
    session_id: &str,
) -> Result<&'a mut SessionEntry, SessionError> {
    sessions
        .get_mut(session_id)
        .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
}

fn invalid_transition(session: &SwarmSession, to: &str) -> SessionError {
    SessionError::InvalidTransition {
        from: session.status.as_str().to_string(),
        to: to.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn manager(dir: &TempDir) -> Arc<SessionManager> {
        let config = SwarmConfig {
            checkpoint_dir: dir.path().to_string_lossy().to_string(),
            ..SwarmConfig::default()
        };
        let store = Arc::new(CheckpointStore::new(
            &config.checkpoint_dir,
            config.max_checkpoints_per_session,
        ));
        Arc::new(SessionManager::new(config, store, EventBus::new()))
    }

    fn subtask(root_id: &str, id: &str) -> HierarchicalTask {
        HierarchicalTask::new(id, format!("subtask {id}"))
            .with_parent(root_id, 0)
            .with_dependency(root_id)
    }

    #[tokio::test]
    async fn test_create_and_start_session() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let session = manager
            .create_session("demo", "a demo", "implement a greeter", ".")
            .await
            .unwrap();
        assert_eq!(
            session.status,
            crate::domain::models::SessionStatus::Initializing
        );

        manager.start_session(&session.id).await.unwrap();
        let view = manager.session_view(&session.id).await.unwrap();
        assert_eq!(
            view.session.status,
            crate::domain::models::SessionStatus::Active
        );
        assert_eq!(view.tree.len(), 1);
        assert_eq!(view.tree.root().role, TaskRole::Planner);

        let active = manager.get_active_session().await.unwrap();
        assert_eq!(active.id, session.id);
    }

    #[tokio::test]
    async fn test_task_lifecycle_updates_metrics_and_context() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let session = manager
            .create_session("demo", "", "implement a greeter", ".")
            .await
            .unwrap();
        manager.start_session(&session.id).await.unwrap();

        let root_id = session.root_task_id.clone();
        manager
            .add_subtasks(&session.id, vec![subtask(&root_id, "a")])
            .await
            .unwrap();
        manager
            .mark_task_started(&session.id, &root_id, "planner")
            .await
            .unwrap();
        manager
            .complete_task(&session.id, &root_id, TaskResult::success("planned"))
            .await
            .unwrap();

        manager.mark_task_queued(&session.id, "a").await.unwrap();
        manager
            .mark_task_started(&session.id, "a", "agent-1")
            .await
            .unwrap();
        let result = TaskResult::success("done").with_summary("done");
        manager
            .complete_task(&session.id, "a", result.clone())
            .await
            .unwrap();

        // IV6: the context store returns exactly the stored result
        let stored = manager.get_context(&session.id, "a").await.unwrap().unwrap();
        assert_eq!(stored, result);

        let view = manager.session_view(&session.id).await.unwrap();
        assert_eq!(view.session.metrics.tasks_by_status["completed"], 2);
        assert_eq!(view.session.metrics.total_tasks, 2);

        // The result was also persisted to disk
        let persisted = manager
            .store()
            .load_task_result(&session.id, "a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted, result);
    }

    #[tokio::test]
    async fn test_failed_task_appends_error_log() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let session = manager
            .create_session("demo", "", "implement a greeter", ".")
            .await
            .unwrap();
        manager.start_session(&session.id).await.unwrap();
        let root_id = session.root_task_id.clone();
        manager
            .add_subtasks(&session.id, vec![subtask(&root_id, "a")])
            .await
            .unwrap();
        manager
            .mark_task_started(&session.id, &root_id, "planner")
            .await
            .unwrap();
        manager
            .complete_task(&session.id, &root_id, TaskResult::success("planned"))
            .await
            .unwrap();

        manager
            .mark_task_started(&session.id, "a", "agent-1")
            .await
            .unwrap();
        manager
            .fail_task(&session.id, "a", "EXECUTION_ERROR: exit code 1")
            .await
            .unwrap();

        let view = manager.session_view(&session.id).await.unwrap();
        assert_eq!(view.tree.get("a").unwrap().status, TaskStatus::Failed);
        assert!(view
            .session
            .errors
            .iter()
            .any(|e| e.message.contains("EXECUTION_ERROR")));
    }

    #[tokio::test]
    async fn test_rework_returns_task_to_pending() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let session = manager
            .create_session("demo", "", "implement a greeter", ".")
            .await
            .unwrap();
        manager.start_session(&session.id).await.unwrap();
        let root_id = session.root_task_id.clone();
        manager
            .add_subtasks(&session.id, vec![subtask(&root_id, "a")])
            .await
            .unwrap();
        manager
            .mark_task_started(&session.id, &root_id, "planner")
            .await
            .unwrap();
        manager
            .complete_task(&session.id, &root_id, TaskResult::success("planned"))
            .await
            .unwrap();
        manager
            .mark_task_started(&session.id, "a", "agent-1")
            .await
            .unwrap();
        manager.mark_task_verifying(&session.id, "a").await.unwrap();

        let retries = manager
            .rework_task(&session.id, "a", Some("try again".to_string()))
            .await
            .unwrap();
        assert_eq!(retries, 1);

        let view = manager.session_view(&session.id).await.unwrap();
        let task = view.tree.get("a").unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.prompt, "try again");
    }

    #[tokio::test]
    async fn test_pause_and_resume_round_trip() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let session = manager
            .create_session("demo", "", "implement a greeter", ".")
            .await
            .unwrap();
        manager.start_session(&session.id).await.unwrap();
        let root_id = session.root_task_id.clone();
        manager
            .add_subtasks(
                &session.id,
                vec![subtask(&root_id, "a"), subtask(&root_id, "b")],
            )
            .await
            .unwrap();
        manager
            .mark_task_started(&session.id, &root_id, "planner")
            .await
            .unwrap();
        manager
            .complete_task(&session.id, &root_id, TaskResult::success("planned"))
            .await
            .unwrap();
        manager
            .mark_task_started(&session.id, "a", "agent-1")
            .await
            .unwrap();

        let checkpoint_id = manager
            .pause_session(&session.id, Some("test pause".to_string()))
            .await
            .unwrap();
        assert!(checkpoint_id.is_some());

        let warnings = manager
            .resume_session(&session.id, checkpoint_id, false)
            .await
            .unwrap();
        // Task "a" was in progress and got reset
        assert_eq!(warnings.len(), 1);

        let view = manager.session_view(&session.id).await.unwrap();
        assert_eq!(
            view.session.status,
            crate::domain::models::SessionStatus::Active
        );
        assert_eq!(view.tree.get("a").unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_resume_unknown_checkpoint_is_not_found() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let session = manager
            .create_session("demo", "", "implement a greeter", ".")
            .await
            .unwrap();
        manager
            .pause_session(&session.id, None)
            .await
            .unwrap();

        let err = manager
            .resume_session(&session.id, Some("cp-0-missing".to_string()), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Persistence(PersistenceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_terminal_session_rejects_mutation() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let session = manager
            .create_session("demo", "", "implement a greeter", ".")
            .await
            .unwrap();
        manager.start_session(&session.id).await.unwrap();
        manager.fail_session(&session.id, "boom").await.unwrap();

        let root_id = session.root_task_id.clone();
        let err = manager
            .add_subtasks(&session.id, vec![subtask(&root_id, "a")])
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_agent_ledger_tracks_peak() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let session = manager
            .create_session("demo", "", "implement a greeter", ".")
            .await
            .unwrap();

        let a = AgentRecord::new(TaskRole::Implementation);
        let b = AgentRecord::new(TaskRole::Testing);
        manager.register_agent(&session.id, a.clone()).await.unwrap();
        manager.register_agent(&session.id, b.clone()).await.unwrap();
        manager.remove_agent(&session.id, &a.id).await.unwrap();

        let view = manager.session_view(&session.id).await.unwrap();
        assert_eq!(view.session.metrics.current_active_agents, 1);
        assert_eq!(view.session.metrics.peak_active_agents, 2);
    }

    #[tokio::test]
    async fn test_create_session_from_tasks_keeps_dependencies() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;
        let a = HierarchicalTask::new("a", "first step");
        let b = HierarchicalTask::new("b", "second step").with_dependency("a");
        let session = manager
            .create_session_from_tasks("batch", vec![a, b], ".")
            .await
            .unwrap();

        let view = manager.session_view(&session.id).await.unwrap();
        assert_eq!(view.tree.len(), 3);
        assert_eq!(
            view.tree.root().status,
            TaskStatus::Completed,
            "synthetic root is pre-completed"
        );
        let executable: Vec<&str> = view
            .tree
            .executable_tasks()
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(executable, vec!["a"]);
    }
}
