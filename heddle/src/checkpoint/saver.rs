//! Checkpoint saver trait and error type.
//!
//! Saves and loads checkpoints by `(lineage_id, namespace, checkpoint_id)`.
//! Implementations: [`crate::checkpoint::MemorySaver`] (in-process),
//! [`crate::checkpoint::RedisSaver`] (pipelined transactions, TTL).

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::checkpoint::checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple, PendingWrite,
};

/// Error type for checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("lineage_id required")]
    LineageRequired,
    #[error("checkpoint_id required")]
    CheckpointIdRequired,
    #[error("invalid parent: {0}")]
    InvalidParent(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Windowing and filtering for [`CheckpointSaver::list`].
#[derive(Clone, Debug, Default)]
pub struct ListFilter {
    /// Strict exclusive upper bound: only checkpoints older than the one this
    /// config references. An unknown reference yields the empty set.
    pub before: Option<CheckpointConfig>,
    pub limit: Option<usize>,
    /// Key/value equality against the checkpoint metadata, applied after
    /// windowing.
    pub metadata: HashMap<String, Value>,
}

impl ListFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_before(mut self, before: CheckpointConfig) -> Self {
        self.before = Some(before);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// True when the tuple's metadata matches every filter pair.
    pub(crate) fn metadata_matches(&self, metadata: &CheckpointMetadata) -> bool {
        if self.metadata.is_empty() {
            return true;
        }
        let as_value = match serde_json::to_value(metadata) {
            Ok(Value::Object(map)) => map,
            _ => return false,
        };
        self.metadata.iter().all(|(key, expected)| {
            as_value
                .get(key)
                .map(|found| found == expected)
                .unwrap_or_else(|| metadata.extra.get(key) == Some(expected))
        })
    }
}

/// Versioned, lineage-scoped checkpoint store.
///
/// Listing is ordered by timestamp descending; checkpoints within a lineage
/// are append-only and removed only by [`CheckpointSaver::delete_lineage`].
///
/// **Interaction**: Held as `Arc<dyn CheckpointSaver>` by graph executors;
/// replay reads the latest tuple and materializes its pending writes.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Stores a checkpoint and returns a config pointing at it. Timestamps
    /// absent (zero) in the checkpoint default to now-UTC nanoseconds;
    /// `new_versions` is merged into the stored channel versions.
    /// Self-parenting is rejected.
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: HashMap<String, i64>,
    ) -> Result<CheckpointConfig, CheckpointError>;

    /// Appends pending writes for the checkpoint referenced by `config`
    /// (which must carry a checkpoint id). Each write's sequence defaults to
    /// its array index when zero; `task_id` / `task_path` are stamped onto
    /// every write.
    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<PendingWrite>,
        task_id: &str,
        task_path: &str,
    ) -> Result<(), CheckpointError>;

    /// Atomic combination of put + put_writes: on backends with transactions
    /// the whole operation succeeds or fails as a unit.
    async fn put_full(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        writes: Vec<PendingWrite>,
    ) -> Result<CheckpointConfig, CheckpointError>;

    /// The checkpoint alone; `None` without error when nothing matches.
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.get_tuple(config).await?.map(|t| t.checkpoint))
    }

    /// The full tuple. Without a checkpoint id in `config`, the latest
    /// checkpoint for `(lineage, namespace)` by timestamp.
    async fn get_tuple(
        &self,
        config: &CheckpointConfig,
    ) -> Result<Option<CheckpointTuple>, CheckpointError>;

    /// Tuples for `(lineage, namespace)`, newest first, windowed by `filter`.
    async fn list(
        &self,
        config: &CheckpointConfig,
        filter: Option<ListFilter>,
    ) -> Result<Vec<CheckpointTuple>, CheckpointError>;

    /// Removes every checkpoint, pending write, and index for the lineage.
    async fn delete_lineage(&self, lineage_id: &str) -> Result<(), CheckpointError>;
}

/// Shared put-side validation: lineage present, no self-parenting.
pub(crate) fn validate_put(
    config: &CheckpointConfig,
    checkpoint: &Checkpoint,
) -> Result<(), CheckpointError> {
    if config.lineage_id.is_empty() {
        return Err(CheckpointError::LineageRequired);
    }
    if checkpoint
        .parent_id
        .as_deref()
        .is_some_and(|parent| parent == checkpoint.id)
    {
        return Err(CheckpointError::InvalidParent(format!(
            "checkpoint {} cannot be its own parent",
            checkpoint.id
        )));
    }
    Ok(())
}

/// Now in UTC nanoseconds, the saver timestamp domain.
pub(crate) fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Stamps task identity and index-defaulted sequences onto writes.
pub(crate) fn stamp_writes(
    mut writes: Vec<PendingWrite>,
    task_id: &str,
    task_path: &str,
) -> Vec<PendingWrite> {
    for (index, write) in writes.iter_mut().enumerate() {
        write.task_id = task_id.to_string();
        write.task_path = task_path.to_string();
        if write.sequence == 0 {
            write.sequence = index as i64;
        }
    }
    writes
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Self-parenting checkpoints are rejected at put.
    #[test]
    fn self_parent_rejected() {
        let config = CheckpointConfig::new("l1");
        let mut checkpoint = Checkpoint::new("c1");
        checkpoint.parent_id = Some("c1".into());
        assert!(matches!(
            validate_put(&config, &checkpoint),
            Err(CheckpointError::InvalidParent(_))
        ));
        checkpoint.parent_id = Some("c0".into());
        assert!(validate_put(&config, &checkpoint).is_ok());
    }

    /// **Scenario**: Metadata filter matches source, step, and extra keys.
    #[test]
    fn metadata_filter_matching() {
        let mut metadata = CheckpointMetadata::new(crate::checkpoint::CheckpointSource::Loop, 3);
        metadata
            .extra
            .insert("run".into(), serde_json::json!("nightly"));

        let filter = ListFilter::new()
            .with_metadata("source", serde_json::json!("loop"))
            .with_metadata("step", serde_json::json!(3))
            .with_metadata("run", serde_json::json!("nightly"));
        assert!(filter.metadata_matches(&metadata));

        let wrong = ListFilter::new().with_metadata("step", serde_json::json!(4));
        assert!(!wrong.metadata_matches(&metadata));
    }

    /// **Scenario**: stamp_writes defaults zero sequences to array indexes.
    #[test]
    fn stamp_writes_defaults_sequence() {
        let writes = vec![
            PendingWrite {
                channel: "a".into(),
                ..PendingWrite::default()
            },
            PendingWrite {
                channel: "b".into(),
                sequence: 7,
                ..PendingWrite::default()
            },
            PendingWrite {
                channel: "c".into(),
                ..PendingWrite::default()
            },
        ];
        let stamped = stamp_writes(writes, "t1", "path");
        assert_eq!(stamped[0].sequence, 0);
        assert_eq!(stamped[1].sequence, 7);
        assert_eq!(stamped[2].sequence, 2);
        assert!(stamped.iter().all(|w| w.task_id == "t1" && w.task_path == "path"));
    }
}
