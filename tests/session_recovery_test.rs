//! Pause, crash, and resume scenarios across orchestrator instances.

use async_trait::async_trait;
use std::sync::Arc;
use tempfile::TempDir;

use meshseeks::domain::errors::{ExecutorError, PersistenceError, SessionError};
use meshseeks::domain::models::{
    ContextStore, HierarchicalTask, SwarmConfig, TaskResult, TaskStatus,
};
use meshseeks::domain::ports::TaskExecutor;
use meshseeks::infrastructure::storage::CheckpointStore;
use meshseeks::services::{EventBus, Orchestrator, RunStatus};

/// Always-succeeding executor that records which tasks it ran.
struct RecordingExecutor {
    calls: tokio::sync::Mutex<Vec<String>>,
}

impl RecordingExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl TaskExecutor for RecordingExecutor {
    async fn execute(
        &self,
        task: &HierarchicalTask,
        _context: &ContextStore,
    ) -> Result<TaskResult, ExecutorError> {
        self.calls.lock().await.push(task.id.clone());
        Ok(TaskResult::success(format!("output of {}", task.id)))
    }
}

fn test_config(dir: &TempDir) -> SwarmConfig {
    let mut config = SwarmConfig::default();
    config.checkpoint_dir = dir.path().to_string_lossy().to_string();
    config.enable_judge = false;
    config.pool.max_agents = 4;
    config.pool.cooldown_ms = 0;
    config
}

fn orchestrator(config: SwarmConfig, executor: Arc<RecordingExecutor>) -> Orchestrator {
    let store = Arc::new(CheckpointStore::new(
        &config.checkpoint_dir,
        config.max_checkpoints_per_session,
    ));
    Orchestrator::bootstrap(config, store, executor, EventBus::new())
}

fn independent_tasks(ids: &[&str]) -> Vec<HierarchicalTask> {
    ids.iter()
        .map(|id| HierarchicalTask::new(*id, format!("carry out step {id}")))
        .collect()
}

#[tokio::test]
async fn test_pause_terminate_resume_completes_remaining_work() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    // First process: run the session halfway by hand, then pause.
    let session_id = {
        let executor = RecordingExecutor::new();
        let orchestrator = orchestrator(config.clone(), executor);
        let sessions = orchestrator.sessions();
        let session = sessions
            .create_session_from_tasks("recovery", independent_tasks(&["a", "b", "c", "d"]), ".")
            .await
            .unwrap();
        sessions.start_session(&session.id).await.unwrap();

        for id in ["a", "b"] {
            sessions
                .mark_task_started(&session.id, id, "agent-early")
                .await
                .unwrap();
            sessions
                .complete_task(&session.id, id, TaskResult::success(format!("output of {id}")))
                .await
                .unwrap();
        }
        sessions
            .mark_task_started(&session.id, "c", "agent-interrupted")
            .await
            .unwrap();

        let checkpoint_id = sessions
            .pause_session(&session.id, Some("host going down".to_string()))
            .await
            .unwrap();
        assert!(checkpoint_id.is_some());
        session.id
        // Orchestrator dropped here: simulates process termination
    };

    // Second process: fresh orchestrator over the same state directory.
    let executor = RecordingExecutor::new();
    let orchestrator = orchestrator(config, Arc::clone(&executor));
    let status = orchestrator
        .resume_session(&session_id, None, false)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Completed);

    let view = orchestrator
        .sessions()
        .session_view(&session_id)
        .await
        .unwrap();
    for id in ["a", "b", "c", "d"] {
        assert_eq!(
            view.tree.get(id).unwrap().status,
            TaskStatus::Completed,
            "task {id} should be completed after resume"
        );
    }

    // Only the interrupted and never-started tasks ran in process two
    let mut ran = executor.calls().await;
    ran.sort();
    assert_eq!(ran, vec!["c", "d"]);

    // Completed work from process one survived via the context store
    let early = orchestrator
        .sessions()
        .get_context(&session_id, "a")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(early.output, "output of a");
}

#[tokio::test]
async fn test_resume_with_unknown_checkpoint_surfaces_not_found() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let executor = RecordingExecutor::new();
    let orchestrator = orchestrator(config, executor);
    let sessions = orchestrator.sessions();
    let session = sessions
        .create_session_from_tasks("short", independent_tasks(&["a"]), ".")
        .await
        .unwrap();
    sessions
        .pause_session(&session.id, None)
        .await
        .unwrap();

    let err = orchestrator
        .resume_session(&session.id, Some("cp-0-bogus".to_string()), false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Persistence(PersistenceError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_corrupted_checkpoint_fails_resume_and_preserves_disk_state() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let executor = RecordingExecutor::new();
    let orchestrator = orchestrator(config, executor);
    let sessions = orchestrator.sessions();
    let session = sessions
        .create_session_from_tasks("fragile", independent_tasks(&["a"]), ".")
        .await
        .unwrap();
    let checkpoint_id = sessions
        .pause_session(&session.id, None)
        .await
        .unwrap()
        .unwrap();

    // Flip one byte of embedded state, keeping the JSON well-formed
    let path = dir
        .path()
        .join(&session.id)
        .join("checkpoints")
        .join(format!("{checkpoint_id}.json"));
    let text = std::fs::read_to_string(&path).unwrap();
    let corrupted = text.replace("carry out step a", "carry out step A");
    assert_ne!(text, corrupted);
    std::fs::write(&path, corrupted).unwrap();

    let err = orchestrator
        .resume_session(&session.id, Some(checkpoint_id), false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Persistence(PersistenceError::ChecksumMismatch(_))
    ));

    // The session's other on-disk state is untouched
    let store = sessions.store();
    assert!(store.load_session(&session.id).await.unwrap().is_some());
    assert!(store.load_task_tree(&session.id).await.unwrap().is_some());
}
