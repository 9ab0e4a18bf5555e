//! Code-assistant subprocess executor.
//!
//! The canonical [`TaskExecutor`]: spawns the external coding assistant CLI
//! once per task with `--dangerously-skip-permissions` and `-p <prompt>`,
//! working directory set to the task's work folder, stdin ignored, stdout
//! captured as the result payload and stderr as the error payload. Exit
//! code 0 is success; any other exit folds the code and stderr into a
//! failed result. The child is killed when the per-task deadline elapses.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::domain::errors::ExecutorError;
use crate::domain::models::{
    ContextStore, ExecutorConfig, HierarchicalTask, ReturnMode, SwarmConfig, TaskMetrics,
    TaskResult,
};
use crate::domain::ports::TaskExecutor;

/// Executes tasks by shelling out to the assistant CLI. The binary must be
/// installed and authenticated separately.
pub struct CodeAssistantExecutor {
    config: ExecutorConfig,
    task_timeout_ms: u64,
}

impl CodeAssistantExecutor {
    pub fn new(config: &SwarmConfig) -> Self {
        Self {
            config: config.executor.clone(),
            task_timeout_ms: config.agent_timeout_ms,
        }
    }

    /// Check whether the assistant binary is runnable.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.config.assistant_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Build the prompt handed to the assistant: the task prompt followed
    /// by each completed dependency's output (summary or full per that
    /// dependency's return mode).
    fn format_prompt(task: &HierarchicalTask, context: &ContextStore) -> String {
        let mut prompt = String::new();
        prompt.push_str(&task.prompt);
        if !context.is_empty() {
            prompt.push_str("\n\nResults from prerequisite tasks:\n");
            let mut dep_ids: Vec<&String> = context.keys().collect();
            dep_ids.sort();
            for dep_id in dep_ids {
                let result = &context[dep_id];
                let text = match task.return_mode {
                    ReturnMode::Summary => result.summary_or_output(),
                    ReturnMode::Full => result.output.as_str(),
                };
                prompt.push_str(&format!("\n--- {dep_id} ---\n{text}\n"));
            }
        }
        prompt
    }

    fn build_command(&self, task: &HierarchicalTask, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.config.assistant_path);
        cmd.current_dir(&task.work_folder);
        for arg in &self.config.extra_args {
            cmd.arg(arg);
        }
        cmd.arg("--dangerously-skip-permissions");
        cmd.arg("-p").arg(prompt);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TaskExecutor for CodeAssistantExecutor {
    async fn execute(
        &self,
        task: &HierarchicalTask,
        context: &ContextStore,
    ) -> Result<TaskResult, ExecutorError> {
        let prompt = Self::format_prompt(task, context);
        let mut cmd = self.build_command(task, &prompt);

        info!(
            task_id = %task.id,
            role = %task.role.as_str(),
            work_folder = %task.work_folder,
            prompt_length = prompt.len(),
            "Spawning assistant subprocess"
        );

        let started = std::time::Instant::now();
        let child = cmd.spawn().map_err(|e| {
            error!(task_id = %task.id, error = %e, "Failed to spawn assistant subprocess");
            ExecutorError::ExecutionFailed(format!(
                "failed to spawn {}: {e}",
                self.config.assistant_path
            ))
        })?;

        let deadline = Duration::from_millis(self.task_timeout_ms.max(1));
        let output = match timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ExecutorError::ExecutionFailed(format!(
                    "failed to collect subprocess output: {e}"
                )));
            }
            Err(_) => {
                // kill_on_drop reaps the child when the future is dropped
                warn!(task_id = %task.id, timeout_ms = self.task_timeout_ms, "Assistant subprocess timed out");
                return Err(ExecutorError::TaskTimeout(self.task_timeout_ms));
            }
        };

        #[allow(clippy::cast_possible_truncation)]
        let execution_time_ms = started.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(
            task_id = %task.id,
            exit_code = ?output.status.code(),
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            execution_time_ms,
            "Assistant subprocess finished"
        );

        let metrics = TaskMetrics {
            execution_time_ms: Some(execution_time_ms),
            ..TaskMetrics::default()
        };

        if output.status.success() {
            Ok(TaskResult {
                success: true,
                output: stdout,
                summary: None,
                artifacts: Vec::new(),
                metrics,
                error: None,
            })
        } else {
            if !stderr.is_empty() {
                warn!(task_id = %task.id, stderr = %stderr, "Assistant subprocess stderr");
            }
            Ok(TaskResult {
                success: false,
                output: stdout,
                summary: None,
                artifacts: Vec::new(),
                metrics,
                error: Some(format!(
                    "assistant exited with code {:?}: {stderr}",
                    output.status.code()
                )),
            })
        }
    }
}
