//! Task result payloads returned by executors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Execution metrics attached to a task result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetrics {
    /// Wall-clock execution time in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    /// Tokens consumed by the worker, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    /// Number of tests the worker ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_run: Option<u64>,
    /// Number of tests that passed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_passed: Option<u64>,
}

impl TaskMetrics {
    /// Fraction of reported tests that passed, when any were run.
    pub fn pass_rate(&self) -> Option<f64> {
        match (self.tests_run, self.tests_passed) {
            (Some(run), Some(passed)) if run > 0 => {
                #[allow(clippy::cast_precision_loss)]
                Some(passed.min(run) as f64 / run as f64)
            }
            _ => None,
        }
    }
}

/// Opaque payload returned by a completed (or failed) task execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Whether the worker considered the task successful
    pub success: bool,
    /// Primary output (stdout of the worker subprocess)
    pub output: String,
    /// Optional condensed summary for summary-mode propagation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Paths or identifiers of produced artifacts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    /// Execution metrics
    #[serde(default)]
    pub metrics: TaskMetrics,
    /// Error payload when the execution failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    /// Successful result with the given output.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Self::default()
        }
    }

    /// Failed result with the given error payload.
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            output: String::new(),
            error: Some(error),
            ..Self::default()
        }
    }

    /// Attach a summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Attach metrics.
    pub fn with_metrics(mut self, metrics: TaskMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// The text that flows to dependents in summary mode: the summary when
    /// present, otherwise the output.
    pub fn summary_or_output(&self) -> &str {
        self.summary.as_deref().unwrap_or(&self.output)
    }
}

/// Per-session mapping of task id to its result, used to feed dependency
/// outputs into dependent tasks.
pub type ContextStore = HashMap<String, TaskResult>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_rate() {
        let metrics = TaskMetrics {
            tests_run: Some(10),
            tests_passed: Some(7),
            ..TaskMetrics::default()
        };
        assert!((metrics.pass_rate().unwrap() - 0.7).abs() < f64::EPSILON);

        let none = TaskMetrics::default();
        assert!(none.pass_rate().is_none());

        let zero = TaskMetrics {
            tests_run: Some(0),
            tests_passed: Some(0),
            ..TaskMetrics::default()
        };
        assert!(zero.pass_rate().is_none());
    }

    #[test]
    fn test_summary_or_output() {
        let result = TaskResult::success("full output").with_summary("short");
        assert_eq!(result.summary_or_output(), "short");

        let result = TaskResult::success("full output");
        assert_eq!(result.summary_or_output(), "full output");
    }

    #[test]
    fn test_serde_round_trip() {
        let result = TaskResult::success("done").with_metrics(TaskMetrics {
            execution_time_ms: Some(1200),
            tokens_used: Some(400),
            tests_run: Some(3),
            tests_passed: Some(3),
        });
        let json = serde_json::to_string(&result).unwrap();
        let back: TaskResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result, back);
    }
}
