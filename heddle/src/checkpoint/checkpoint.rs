//! Checkpoint model: snapshots, metadata, pending writes, and config keys.
//!
//! Checkpoints are keyed by `(lineage_id, namespace, checkpoint_id)` and form
//! a DAG by `parent_id` within a lineage. A namespace partitions checkpoints
//! inside a lineage (e.g. sub-graph scoping).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What produced a checkpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// First checkpoint of an execution, from graph input.
    Input,
    /// Produced by a regular execution step.
    #[default]
    Loop,
    /// Produced by an external state update.
    Update,
    /// Produced by forking another checkpoint.
    Fork,
}

/// Pointer to a checkpoint slot: lineage, namespace, and optionally a
/// specific checkpoint id (absent means "latest").
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub lineage_id: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
}

impl CheckpointConfig {
    pub fn new(lineage_id: impl Into<String>) -> Self {
        Self {
            lineage_id: lineage_id.into(),
            namespace: String::new(),
            checkpoint_id: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }
}

/// One state snapshot. `timestamp` is UTC nanoseconds; savers default it to
/// now when zero.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub channel_values: HashMap<String, Value>,
    #[serde(default)]
    pub next_channel_values: HashMap<String, Value>,
    #[serde(default)]
    pub channel_versions: HashMap<String, i64>,
}

impl Checkpoint {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Metadata stored beside a checkpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    #[serde(default)]
    pub source: CheckpointSource,
    #[serde(default)]
    pub step: i64,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl CheckpointMetadata {
    pub fn new(source: CheckpointSource, step: i64) -> Self {
        Self {
            source,
            step,
            extra: HashMap::new(),
        }
    }
}

/// A per-task channel update belonging to a checkpoint, materialized on
/// replay. Sorted by `sequence` ascending, ties broken by arrival index.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub task_id: String,
    #[serde(default)]
    pub task_path: String,
    pub channel: String,
    pub value: Value,
    #[serde(default)]
    pub sequence: i64,
}

/// A checkpoint bundled with its metadata, materialized pending writes, and
/// config pointers to itself and its parent. Returned by-value; the store
/// keeps its own copy.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckpointTuple {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub pending_writes: Vec<PendingWrite>,
    pub parent_config: Option<CheckpointConfig>,
}

/// Stable sort by `sequence` ascending; arrival order breaks ties.
pub fn sort_pending_writes(writes: &mut [PendingWrite]) {
    writes.sort_by_key(|w| w.sequence);
}
