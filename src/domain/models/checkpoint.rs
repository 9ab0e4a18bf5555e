//! Checkpoint domain model.
//!
//! A checkpoint is an immutable, checksum-validated snapshot of a session:
//! its metadata, full task tree, agent states, and (optionally) context
//! store. The checksum covers (session id, timestamp, task tree, agent
//! states) and is computed before the snapshot is embedded in the file, so
//! re-reading and re-hashing a stored checkpoint reproduces it exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

use super::agent::AgentRecord;
use super::result::ContextStore;
use super::session::SwarmSession;
use super::task::TaskTree;
use crate::domain::errors::PersistenceError;

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: &str = "1.0.0";

/// What caused a checkpoint to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTrigger {
    /// Periodic auto-checkpoint timer
    Auto,
    /// Explicit caller request (including pause)
    Manual,
    /// Session or process shutdown
    Shutdown,
    /// Written while handling an error
    Error,
}

impl CheckpointTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Shutdown => "shutdown",
            Self::Error => "error",
        }
    }
}

/// An immutable snapshot of session state sufficient to resume execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Globally unique identifier (timestamp + random suffix)
    pub id: String,
    /// Owning session
    pub session_id: String,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// What caused the write
    pub trigger: CheckpointTrigger,
    /// Optional free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Embedded session metadata
    pub session: SwarmSession,
    /// Embedded task tree
    pub task_tree: TaskTree,
    /// Embedded worker snapshots
    pub agent_states: Vec<AgentRecord>,
    /// Embedded context store (empty when context was excluded)
    pub context_store: ContextStore,
    /// Hex SHA-256 over (session id, timestamp, task tree, agent states)
    pub checksum: String,
    /// Format version at write time
    pub version: String,
    /// Serialized size in bytes, stamped by the store after encoding
    pub size_bytes: u64,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Checkpoint {
    /// Build a checkpoint, computing the integrity checksum before the
    /// state is embedded.
    pub fn new(
        session: SwarmSession,
        task_tree: TaskTree,
        agent_states: Vec<AgentRecord>,
        context_store: ContextStore,
        trigger: CheckpointTrigger,
        description: Option<String>,
    ) -> Result<Self, PersistenceError> {
        let timestamp = Utc::now();
        let checksum = compute_checksum(&session.id, timestamp, &task_tree, &agent_states)?;
        Ok(Self {
            id: generate_checkpoint_id(timestamp),
            session_id: session.id.clone(),
            timestamp,
            trigger,
            description,
            session,
            task_tree,
            agent_states,
            context_store,
            checksum,
            version: CHECKPOINT_VERSION.to_string(),
            size_bytes: 0,
            metadata: HashMap::new(),
        })
    }

    /// Recompute the checksum over the embedded state and compare it to the
    /// stored one.
    pub fn verify_checksum(&self) -> Result<bool, PersistenceError> {
        let recomputed = compute_checksum(
            &self.session_id,
            self.timestamp,
            &self.task_tree,
            &self.agent_states,
        )?;
        Ok(recomputed == self.checksum)
    }

    /// Check the stored format version against the current one.
    pub fn verify_version(&self) -> Result<(), PersistenceError> {
        if self.version == CHECKPOINT_VERSION {
            Ok(())
        } else {
            Err(PersistenceError::VersionMismatch {
                stored: self.version.clone(),
                expected: CHECKPOINT_VERSION.to_string(),
            })
        }
    }
}

/// Hex SHA-256 over the canonical JSON of (session id, timestamp, task
/// tree, agent states).
///
/// `serde_json` maps serialize with sorted keys, so the encoding is
/// deterministic across a serialize/deserialize round trip.
pub fn compute_checksum(
    session_id: &str,
    timestamp: DateTime<Utc>,
    task_tree: &TaskTree,
    agent_states: &[AgentRecord],
) -> Result<String, PersistenceError> {
    let payload = serde_json::json!([
        session_id,
        timestamp,
        serde_json::to_value(task_tree)?,
        serde_json::to_value(agent_states)?,
    ]);
    let encoded = serde_json::to_string(&payload)?;
    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Generate a checkpoint id embedding the snapshot timestamp.
fn generate_checkpoint_id(timestamp: DateTime<Utc>) -> String {
    format!(
        "cp-{}-{}",
        timestamp.timestamp_millis(),
        &Uuid::new_v4().simple().to_string()[..8]
    )
}
