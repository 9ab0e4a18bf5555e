//! MeshSeeks - Multi-Agent Orchestration Engine
//!
//! A single-process control plane that decomposes a coding prompt into a
//! hierarchical task tree, dispatches ready tasks to a bounded auto-scaling
//! pool of subprocess workers, verifies results with a rule-based judge
//! (with rework loops), and persists crash-consistent checkpoints so
//! sessions can pause, crash, and resume:
//! - Hierarchical planner with keyword buckets and dependency strategies
//! - Priority-queued agent pool with health monitoring and auto-scaling
//! - Multi-criterion judge with rework prompt synthesis
//! - Session manager with context propagation and auto-checkpointing
//! - Atomic, checksum-validated, optionally compressed checkpoint store

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::models::{HierarchicalTask, SwarmConfig, SwarmSession, TaskResult};
pub use domain::ports::TaskExecutor;
pub use infrastructure::storage::CheckpointStore;
pub use services::{EventBus, Orchestrator, RunStatus};
