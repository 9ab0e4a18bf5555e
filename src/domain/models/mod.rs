//! Domain models: pure data types and their state machines.

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod queue;
pub mod result;
pub mod session;
pub mod task;
pub mod verdict;

pub use agent::{AgentRecord, AgentState};
pub use checkpoint::{compute_checksum, Checkpoint, CheckpointTrigger, CHECKPOINT_VERSION};
pub use config::{
    DecompositionStrategy, ExecutorConfig, LoggingConfig, PoolConfig, SwarmConfig,
};
pub use queue::PriorityQueue;
pub use result::{ContextStore, TaskMetrics, TaskResult};
pub use session::{SessionErrorEntry, SessionMetrics, SessionStatus, SwarmSession};
pub use task::{
    generate_task_id, HierarchicalTask, ReturnMode, TaskPriority, TaskRole, TaskStatus, TaskTree,
    TreeStatistics,
};
pub use verdict::{CriterionConfig, CriterionKind, CriterionScore, JudgeVerdict};
