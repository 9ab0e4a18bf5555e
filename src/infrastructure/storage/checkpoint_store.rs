//! Checkpoint store: durable, versioned session snapshots.
//!
//! Per-session on-disk layout:
//!
//! ```text
//! <base>/<sessionId>/
//!   session.json                 -- session metadata, no task tree
//!   task-tree.json               -- task tree only
//!   checkpoints/<cpId>.json[.gz] -- full Checkpoint objects
//!   results/<taskId>.json        -- opaque per-task results
//!   logs/                        -- reserved
//! ```
//!
//! Checkpoint writes never panic past the boundary: failures come back as a
//! structured outcome with `success = false` and an error string, so the
//! auto-checkpoint path can log and continue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::domain::errors::PersistenceError;
use crate::domain::models::{
    AgentRecord, Checkpoint, CheckpointTrigger, ContextStore, SwarmSession, TaskResult, TaskStatus,
    TaskTree,
};
use crate::infrastructure::storage::file_backend::{FileBackend, ListOptions, SortOrder};

/// Options for creating a checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointOptions {
    /// What caused the write
    pub trigger: CheckpointTrigger,
    /// Optional free-form description
    pub description: Option<String>,
    /// Write the checkpoint gzip-compressed (`.json.gz`)
    pub compress: bool,
    /// Embed the context store; `false` writes an empty map to save space
    pub include_context: bool,
}

impl Default for CheckpointOptions {
    fn default() -> Self {
        Self {
            trigger: CheckpointTrigger::Manual,
            description: None,
            compress: false,
            include_context: true,
        }
    }
}

/// Structured outcome of a checkpoint write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointOutcome {
    pub success: bool,
    pub checkpoint_id: Option<String>,
    pub size_bytes: u64,
    pub error: Option<String>,
}

impl CheckpointOutcome {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            checkpoint_id: None,
            size_bytes: 0,
            error: Some(error.into()),
        }
    }
}

/// Listing entry for a stored checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointSummary {
    pub id: String,
    pub size_bytes: u64,
    pub modified: SystemTime,
    pub compressed: bool,
}

/// Options for restoring a checkpoint.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Checkpoint to restore; `None` restores the latest
    pub checkpoint_id: Option<String>,
    /// Revert every failed task to pending with retry count 0
    pub reset_failed_tasks: bool,
    /// Revert every in-progress (or queued/verifying) task to pending
    pub reset_in_progress_tasks: bool,
    /// Re-verify the stored checksum before restoring
    pub validate_checksum: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            checkpoint_id: None,
            reset_failed_tasks: false,
            reset_in_progress_tasks: true,
            validate_checksum: true,
        }
    }
}

/// State handed back to the session manager after a restore.
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub checkpoint_id: String,
    pub session: SwarmSession,
    pub task_tree: TaskTree,
    pub agent_states: Vec<AgentRecord>,
    pub context_store: ContextStore,
    pub reset_failed: usize,
    pub reset_in_progress: usize,
    pub warnings: Vec<String>,
}

/// Durable persistence for sessions, task trees, checkpoints, and task
/// results.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    backend: FileBackend,
    base_dir: PathBuf,
    max_checkpoints_per_session: usize,
}

impl CheckpointStore {
    /// Create a store rooted at `base_dir` (a leading `~` expands to the
    /// home directory).
    pub fn new(base_dir: &str, max_checkpoints_per_session: usize) -> Self {
        Self {
            backend: FileBackend::new(),
            base_dir: FileBackend::expand_home(base_dir),
            max_checkpoints_per_session,
        }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(session_id)
    }

    fn checkpoints_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("checkpoints")
    }

    fn results_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("results")
    }

    /// Persist session metadata (no task tree).
    pub async fn save_session(&self, session: &SwarmSession) -> Result<(), PersistenceError> {
        let path = self.session_dir(&session.id).join("session.json");
        self.backend.write_json(&path, session).await?;
        Ok(())
    }

    /// Load session metadata; `Ok(None)` when the session has no on-disk
    /// state.
    pub async fn load_session(
        &self,
        session_id: &str,
    ) -> Result<Option<SwarmSession>, PersistenceError> {
        let path = self.session_dir(session_id).join("session.json");
        self.backend.read_json(&path).await
    }

    /// Persist the task tree.
    pub async fn save_task_tree(
        &self,
        session_id: &str,
        tree: &TaskTree,
    ) -> Result<(), PersistenceError> {
        let path = self.session_dir(session_id).join("task-tree.json");
        self.backend.write_json(&path, tree).await?;
        Ok(())
    }

    /// Load the task tree; `Ok(None)` when absent.
    pub async fn load_task_tree(
        &self,
        session_id: &str,
    ) -> Result<Option<TaskTree>, PersistenceError> {
        let path = self.session_dir(session_id).join("task-tree.json");
        self.backend.read_json(&path).await
    }

    /// Serialize the in-memory state into a checkpoint file, trim old
    /// checkpoints beyond the per-session cap, and return the outcome.
    ///
    /// The integrity checksum is computed before the state is embedded, so
    /// restores can re-verify it byte-for-byte.
    pub async fn create_checkpoint(
        &self,
        session: &SwarmSession,
        tree: &TaskTree,
        agents: &[AgentRecord],
        context: &ContextStore,
        options: CheckpointOptions,
    ) -> CheckpointOutcome {
        let context = if options.include_context {
            context.clone()
        } else {
            ContextStore::new()
        };
        let mut checkpoint = match Checkpoint::new(
            session.clone(),
            tree.clone(),
            agents.to_vec(),
            context,
            options.trigger,
            options.description,
        ) {
            Ok(cp) => cp,
            Err(e) => return CheckpointOutcome::failure(e.to_string()),
        };

        // Stamp the serialized size before the write; the checksum does not
        // cover it.
        match serde_json::to_vec(&checkpoint) {
            Ok(encoded) => checkpoint.size_bytes = encoded.len() as u64,
            Err(e) => return CheckpointOutcome::failure(e.to_string()),
        }

        let file_name = if options.compress {
            format!("{}.json.gz", checkpoint.id)
        } else {
            format!("{}.json", checkpoint.id)
        };
        let path = self.checkpoints_dir(&session.id).join(file_name);

        let write = if options.compress {
            self.backend.write_json_gz(&path, &checkpoint).await
        } else {
            self.backend.write_json(&path, &checkpoint).await
        };
        let written = match write {
            Ok(bytes) => bytes,
            Err(e) => return CheckpointOutcome::failure(e.to_string()),
        };

        // Keep the sibling session/tree files current with the snapshot.
        if let Err(e) = self.save_session(session).await {
            warn!(session_id = %session.id, error = %e, "Failed to refresh session.json during checkpoint");
        }
        if let Err(e) = self.save_task_tree(&session.id, tree).await {
            warn!(session_id = %session.id, error = %e, "Failed to refresh task-tree.json during checkpoint");
        }

        match self
            .backend
            .cleanup_keep_newest(
                &self.checkpoints_dir(&session.id),
                self.max_checkpoints_per_session,
            )
            .await
        {
            Ok(0) => {}
            Ok(trimmed) => {
                debug!(session_id = %session.id, trimmed, "Trimmed old checkpoints");
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Checkpoint trim failed");
            }
        }

        info!(
            session_id = %session.id,
            checkpoint_id = %checkpoint.id,
            trigger = %checkpoint.trigger.as_str(),
            size_bytes = written,
            compressed = options.compress,
            "Checkpoint created"
        );

        CheckpointOutcome {
            success: true,
            checkpoint_id: Some(checkpoint.id),
            size_bytes: written,
            error: None,
        }
    }

    /// List checkpoints for a session, newest first.
    pub async fn list_checkpoints(
        &self,
        session_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<CheckpointSummary>, PersistenceError> {
        let entries = self
            .backend
            .list_dir(
                &self.checkpoints_dir(session_id),
                &ListOptions {
                    sort: SortOrder::ModifiedDescending,
                    limit,
                    offset,
                    ..ListOptions::default()
                },
            )
            .await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let name = entry.path.file_name()?.to_string_lossy().to_string();
                let (id, compressed) = if let Some(stem) = name.strip_suffix(".json.gz") {
                    (stem.to_string(), true)
                } else if let Some(stem) = name.strip_suffix(".json") {
                    (stem.to_string(), false)
                } else {
                    return None;
                };
                Some(CheckpointSummary {
                    id,
                    size_bytes: entry.size_bytes,
                    modified: entry.modified,
                    compressed,
                })
            })
            .collect())
    }

    /// Read a checkpoint, transparently handling the compressed form.
    /// `Ok(None)` when absent.
    pub async fn get_checkpoint(
        &self,
        session_id: &str,
        checkpoint_id: &str,
    ) -> Result<Option<Checkpoint>, PersistenceError> {
        let dir = self.checkpoints_dir(session_id);
        for name in [
            format!("{checkpoint_id}.json"),
            format!("{checkpoint_id}.json.gz"),
        ] {
            if let Some(cp) = self.backend.read_json(&dir.join(name)).await? {
                return Ok(Some(cp));
            }
        }
        Ok(None)
    }

    /// Read the most recently written checkpoint. `Ok(None)` when the
    /// session has none.
    pub async fn latest_checkpoint(
        &self,
        session_id: &str,
    ) -> Result<Option<Checkpoint>, PersistenceError> {
        let summaries = self.list_checkpoints(session_id, Some(1), 0).await?;
        match summaries.first() {
            Some(summary) => self.get_checkpoint(session_id, &summary.id).await,
            None => Ok(None),
        }
    }

    /// Restore session state from a checkpoint.
    ///
    /// An explicit checkpoint id that does not exist is `NotFound`; it is
    /// never reinterpreted as something else. The restored session and tree
    /// are written back so the on-disk sibling files match what callers see.
    pub async fn restore_checkpoint(
        &self,
        session_id: &str,
        options: RestoreOptions,
    ) -> Result<RestoreOutcome, PersistenceError> {
        let checkpoint = match &options.checkpoint_id {
            Some(id) => self
                .get_checkpoint(session_id, id)
                .await?
                .ok_or_else(|| PersistenceError::NotFound(format!("checkpoint {id}")))?,
            None => self.latest_checkpoint(session_id).await?.ok_or_else(|| {
                PersistenceError::NotFound(format!("no checkpoints for session {session_id}"))
            })?,
        };

        checkpoint.verify_version()?;
        if options.validate_checksum && !checkpoint.verify_checksum()? {
            return Err(PersistenceError::ChecksumMismatch(checkpoint.id.clone()));
        }

        let Checkpoint {
            id: checkpoint_id,
            mut session,
            mut task_tree,
            agent_states,
            context_store,
            ..
        } = checkpoint;

        let mut warnings = Vec::new();
        let mut reset_failed = 0;
        let mut reset_in_progress = 0;
        let task_ids: Vec<String> = task_tree.task_ids().cloned().collect();
        for task_id in task_ids {
            let Some(task) = task_tree.get_mut(&task_id) else {
                continue;
            };
            match task.status {
                TaskStatus::Failed if options.reset_failed_tasks => {
                    task.force_status(TaskStatus::Pending, "restore: reset failed task");
                    task.retry_count = 0;
                    reset_failed += 1;
                    warnings.push(format!("failed task {task_id} reset to pending"));
                }
                // Queued and verifying count as in-flight: nothing would
                // ever advance them after a restore.
                TaskStatus::InProgress | TaskStatus::Queued | TaskStatus::Verifying
                    if options.reset_in_progress_tasks =>
                {
                    task.force_status(TaskStatus::Pending, "restore: reset in-flight task");
                    reset_in_progress += 1;
                    warnings.push(format!("in-flight task {task_id} reset to pending"));
                }
                _ => {}
            }
        }

        session.metrics.checkpoints_restored += 1;
        self.save_session(&session).await?;
        self.save_task_tree(&session.id, &task_tree).await?;

        info!(
            session_id = %session.id,
            checkpoint_id = %checkpoint_id,
            reset_failed,
            reset_in_progress,
            "Checkpoint restored"
        );

        Ok(RestoreOutcome {
            checkpoint_id,
            session,
            task_tree,
            agent_states,
            context_store,
            reset_failed,
            reset_in_progress,
            warnings,
        })
    }

    /// Persist an opaque per-task result payload.
    pub async fn save_task_result(
        &self,
        session_id: &str,
        task_id: &str,
        result: &TaskResult,
    ) -> Result<(), PersistenceError> {
        let path = self.results_dir(session_id).join(format!("{task_id}.json"));
        self.backend.write_json(&path, result).await?;
        Ok(())
    }

    /// Load a per-task result payload; `Ok(None)` when absent.
    pub async fn load_task_result(
        &self,
        session_id: &str,
        task_id: &str,
    ) -> Result<Option<TaskResult>, PersistenceError> {
        let path = self.results_dir(session_id).join(format!("{task_id}.json"));
        self.backend.read_json(&path).await
    }

    /// Session ids with on-disk state.
    pub async fn list_session_ids(&self) -> Result<Vec<String>, PersistenceError> {
        let mut ids = Vec::new();
        let mut reader = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(PersistenceError::io(self.base_dir.display().to_string(), e)),
        };
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| PersistenceError::io(self.base_dir.display().to_string(), e))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| PersistenceError::io(entry.path().display().to_string(), e))?;
            if meta.is_dir() {
                ids.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Remove a session's entire on-disk state; used to garbage-collect
    /// expired sessions.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, PersistenceError> {
        let dir = self.session_dir(session_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PersistenceError::io(dir.display().to_string(), e)),
        }
    }

    /// Delete on-disk state of sessions that expired before `now`. Returns
    /// the ids that were collected.
    pub async fn collect_expired_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, PersistenceError> {
        let mut collected = Vec::new();
        for session_id in self.list_session_ids().await? {
            let Some(session) = self.load_session(&session_id).await? else {
                continue;
            };
            if session.is_terminal() && session.is_expired(now) {
                self.delete_session(&session_id).await?;
                collected.push(session_id);
            }
        }
        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{HierarchicalTask, SwarmConfig, TaskRole};
    use tempfile::TempDir;

    fn fixture() -> (SwarmSession, TaskTree, Vec<AgentRecord>, ContextStore) {
        let tree = TaskTree::new(HierarchicalTask::new("root", "build the feature"));
        let session = SwarmSession::new("fixture", "", "root", SwarmConfig::default());
        let agents = vec![AgentRecord::new(TaskRole::Implementation)];
        let mut context = ContextStore::new();
        context.insert("root".to_string(), TaskResult::success("root output"));
        (session, tree, agents, context)
    }

    fn store(dir: &TempDir, max: usize) -> CheckpointStore {
        CheckpointStore::new(&dir.path().to_string_lossy(), max)
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        let (session, tree, agents, context) = fixture();

        let outcome = store
            .create_checkpoint(&session, &tree, &agents, &context, CheckpointOptions::default())
            .await;
        assert!(outcome.success, "{:?}", outcome.error);
        let id = outcome.checkpoint_id.unwrap();
        assert!(outcome.size_bytes > 0);

        let cp = store.get_checkpoint(&session.id, &id).await.unwrap().unwrap();
        assert_eq!(cp.session_id, session.id);
        assert_eq!(cp.task_tree, tree);
        assert_eq!(cp.context_store, context);
        assert!(cp.verify_checksum().unwrap());
    }

    #[tokio::test]
    async fn test_compressed_checkpoint_reads_transparently() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        let (session, tree, agents, context) = fixture();

        let outcome = store
            .create_checkpoint(
                &session,
                &tree,
                &agents,
                &context,
                CheckpointOptions {
                    compress: true,
                    ..CheckpointOptions::default()
                },
            )
            .await;
        assert!(outcome.success);
        let id = outcome.checkpoint_id.unwrap();

        let summaries = store.list_checkpoints(&session.id, None, 0).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].compressed);

        let cp = store.get_checkpoint(&session.id, &id).await.unwrap().unwrap();
        assert!(cp.verify_checksum().unwrap());
    }

    #[tokio::test]
    async fn test_exclude_context_writes_empty_map() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        let (session, tree, agents, context) = fixture();

        let outcome = store
            .create_checkpoint(
                &session,
                &tree,
                &agents,
                &context,
                CheckpointOptions {
                    include_context: false,
                    ..CheckpointOptions::default()
                },
            )
            .await;
        let id = outcome.checkpoint_id.unwrap();
        let cp = store.get_checkpoint(&session.id, &id).await.unwrap().unwrap();
        assert!(cp.context_store.is_empty());
    }

    #[tokio::test]
    async fn test_trim_deletes_exactly_the_oldest() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 3);
        let (session, tree, agents, context) = fixture();

        let mut ids = Vec::new();
        for _ in 0..4 {
            let outcome = store
                .create_checkpoint(&session, &tree, &agents, &context, CheckpointOptions::default())
                .await;
            ids.push(outcome.checkpoint_id.unwrap());
            tokio::time::sleep(std::time::Duration::from_millis(15)).await;
        }

        let summaries = store.list_checkpoints(&session.id, None, 0).await.unwrap();
        assert_eq!(summaries.len(), 3);
        let listed: Vec<&str> = summaries.iter().map(|s| s.id.as_str()).collect();
        // Newest first; the first-created checkpoint is gone
        assert_eq!(listed, vec![ids[3].as_str(), ids[2].as_str(), ids[1].as_str()]);
        assert!(store.get_checkpoint(&session.id, &ids[0]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_resets_requested_tasks() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        let (session, mut tree, agents, context) = fixture();

        let failed = HierarchicalTask::new("f", "failing subtask").with_parent("root", 0);
        let running = HierarchicalTask::new("r", "running subtask").with_parent("root", 0);
        let queued = HierarchicalTask::new("q", "queued subtask").with_parent("root", 0);
        let verifying = HierarchicalTask::new("v", "verifying subtask").with_parent("root", 0);
        let done = HierarchicalTask::new("d", "done subtask").with_parent("root", 0);
        tree.add_task(failed).unwrap();
        tree.add_task(running).unwrap();
        tree.add_task(queued).unwrap();
        tree.add_task(verifying).unwrap();
        tree.add_task(done).unwrap();
        tree.get_mut("f").unwrap().force_status(TaskStatus::Failed, "test");
        tree.get_mut("f").unwrap().retry_count = 2;
        tree.get_mut("r").unwrap().force_status(TaskStatus::InProgress, "test");
        tree.get_mut("q").unwrap().force_status(TaskStatus::Queued, "test");
        tree.get_mut("v").unwrap().force_status(TaskStatus::Verifying, "test");
        tree.get_mut("d").unwrap().force_status(TaskStatus::Completed, "test");

        let outcome = store
            .create_checkpoint(&session, &tree, &agents, &context, CheckpointOptions::default())
            .await;
        let id = outcome.checkpoint_id.unwrap();

        let restored = store
            .restore_checkpoint(
                &session.id,
                RestoreOptions {
                    checkpoint_id: Some(id),
                    reset_failed_tasks: true,
                    reset_in_progress_tasks: true,
                    validate_checksum: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(restored.reset_failed, 1);
        // Queued and verifying tasks count as in-flight resets too
        assert_eq!(restored.reset_in_progress, 3);
        assert_eq!(restored.warnings.len(), 4);

        let tree = restored.task_tree;
        assert_eq!(tree.get("f").unwrap().status, TaskStatus::Pending);
        assert_eq!(tree.get("f").unwrap().retry_count, 0);
        for id in ["r", "q", "v"] {
            assert_eq!(
                tree.get(id).unwrap().status,
                TaskStatus::Pending,
                "in-flight task {id} should reset to pending"
            );
        }
        assert_eq!(tree.get("d").unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_restore_without_reset_keeps_in_flight_statuses() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        let (session, mut tree, agents, context) = fixture();

        let queued = HierarchicalTask::new("q", "queued subtask").with_parent("root", 0);
        let verifying = HierarchicalTask::new("v", "verifying subtask").with_parent("root", 0);
        tree.add_task(queued).unwrap();
        tree.add_task(verifying).unwrap();
        tree.get_mut("q").unwrap().force_status(TaskStatus::Queued, "test");
        tree.get_mut("v").unwrap().force_status(TaskStatus::Verifying, "test");

        let outcome = store
            .create_checkpoint(&session, &tree, &agents, &context, CheckpointOptions::default())
            .await;
        let id = outcome.checkpoint_id.unwrap();

        let restored = store
            .restore_checkpoint(
                &session.id,
                RestoreOptions {
                    checkpoint_id: Some(id),
                    reset_failed_tasks: false,
                    reset_in_progress_tasks: false,
                    validate_checksum: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(restored.reset_in_progress, 0);
        assert!(restored.warnings.is_empty());
        assert_eq!(restored.task_tree.get("q").unwrap().status, TaskStatus::Queued);
        assert_eq!(
            restored.task_tree.get("v").unwrap().status,
            TaskStatus::Verifying
        );
    }

    #[tokio::test]
    async fn test_corrupted_checkpoint_fails_checksum() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        let (session, tree, agents, context) = fixture();

        let outcome = store
            .create_checkpoint(&session, &tree, &agents, &context, CheckpointOptions::default())
            .await;
        let id = outcome.checkpoint_id.unwrap();

        // Corrupt one byte of embedded state, keeping the JSON valid
        let path = dir
            .path()
            .join(&session.id)
            .join("checkpoints")
            .join(format!("{id}.json"));
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let corrupted = text.replace("build the feature", "build the fe4ture");
        assert_ne!(text, corrupted);
        tokio::fs::write(&path, corrupted).await.unwrap();

        let err = store
            .restore_checkpoint(
                &session.id,
                RestoreOptions {
                    checkpoint_id: Some(id.clone()),
                    ..RestoreOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::ChecksumMismatch(cp) if cp == id));
    }

    #[tokio::test]
    async fn test_restore_unknown_checkpoint_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        let (session, tree, agents, context) = fixture();
        store
            .create_checkpoint(&session, &tree, &agents, &context, CheckpointOptions::default())
            .await;

        let err = store
            .restore_checkpoint(
                &session.id,
                RestoreOptions {
                    checkpoint_id: Some("cp-0-deadbeef".to_string()),
                    ..RestoreOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_task_results_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);

        let result = TaskResult::success("task output").with_summary("ok");
        store.save_task_result("s1", "t1", &result).await.unwrap();
        let back = store.load_task_result("s1", "t1").await.unwrap().unwrap();
        assert_eq!(back, result);

        assert!(store.load_task_result("s1", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_and_tree_files_written() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        let (session, tree, agents, context) = fixture();
        store
            .create_checkpoint(&session, &tree, &agents, &context, CheckpointOptions::default())
            .await;

        let loaded = store.load_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        let loaded_tree = store.load_task_tree(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded_tree, tree);
        assert_eq!(store.list_session_ids().await.unwrap(), vec![session.id.clone()]);
    }

    #[tokio::test]
    async fn test_expired_terminal_sessions_are_collected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        let (mut session, tree, _, _) = fixture();
        session.update_status(crate::domain::models::SessionStatus::Completed);
        session.expires_at = Utc::now() - chrono::Duration::hours(1);
        store.save_session(&session).await.unwrap();
        store.save_task_tree(&session.id, &tree).await.unwrap();

        // A live session is untouched
        let (live, live_tree, _, _) = fixture();
        store.save_session(&live).await.unwrap();
        store.save_task_tree(&live.id, &live_tree).await.unwrap();

        let collected = store.collect_expired_sessions(Utc::now()).await.unwrap();
        assert_eq!(collected, vec![session.id.clone()]);
        assert!(store.load_session(&session.id).await.unwrap().is_none());
        assert!(store.load_session(&live.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_latest_checkpoint_none_when_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        assert!(store.latest_checkpoint("nope").await.unwrap().is_none());
        let err = store
            .restore_checkpoint("nope", RestoreOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound(_)));
    }
}
