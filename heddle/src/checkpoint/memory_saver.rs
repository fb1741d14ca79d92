//! In-process checkpoint saver. Not persistent.
//!
//! One readers-writer lock guards the checkpoint map and the per-namespace
//! timestamp index; `list` snapshots under the read lock before copying.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::checkpoint::checkpoint::{
    sort_pending_writes, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple,
    PendingWrite,
};
use crate::checkpoint::saver::{
    now_nanos, stamp_writes, validate_put, CheckpointError, CheckpointSaver, ListFilter,
};

#[derive(Clone)]
struct StoredCheckpoint {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    writes: Vec<PendingWrite>,
}

#[derive(Default)]
struct SaverState {
    /// `(lineage, namespace)` → checkpoint id → stored checkpoint.
    checkpoints: HashMap<(String, String), HashMap<String, StoredCheckpoint>>,
    /// `(lineage, namespace)` → `(timestamp, id)` ascending by timestamp.
    ts_index: HashMap<(String, String), Vec<(i64, String)>>,
}

/// In-process checkpoint saver.
///
/// **Interaction**: Used as `Arc<dyn CheckpointSaver>` for dev and tests;
/// `max_checkpoints_per_lineage` bounds each `(lineage, namespace)` slot by
/// evicting the oldest checkpoint together with its pending writes.
pub struct MemorySaver {
    state: RwLock<SaverState>,
    max_checkpoints_per_lineage: Option<usize>,
}

impl MemorySaver {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SaverState::default()),
            max_checkpoints_per_lineage: None,
        }
    }

    pub fn with_max_checkpoints_per_lineage(mut self, max: usize) -> Self {
        self.max_checkpoints_per_lineage = Some(max.max(1));
        self
    }

    fn slot_key(config: &CheckpointConfig) -> (String, String) {
        (config.lineage_id.clone(), config.namespace.clone())
    }

    fn store(
        &self,
        state: &mut SaverState,
        config: &CheckpointConfig,
        mut checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        writes: Vec<PendingWrite>,
    ) -> CheckpointConfig {
        if checkpoint.timestamp == 0 {
            checkpoint.timestamp = now_nanos();
        }
        let slot = Self::slot_key(config);
        let id = checkpoint.id.clone();
        let timestamp = checkpoint.timestamp;

        let index = state.ts_index.entry(slot.clone()).or_default();
        index.retain(|(_, existing)| existing != &id);
        let position = index.partition_point(|(ts, _)| *ts <= timestamp);
        index.insert(position, (timestamp, id.clone()));

        state.checkpoints.entry(slot.clone()).or_default().insert(
            id.clone(),
            StoredCheckpoint {
                checkpoint,
                metadata,
                writes,
            },
        );

        if let Some(max) = self.max_checkpoints_per_lineage {
            let index = state.ts_index.entry(slot.clone()).or_default();
            while index.len() > max {
                let (_, evicted) = index.remove(0);
                if let Some(map) = state.checkpoints.get_mut(&slot) {
                    map.remove(&evicted);
                }
            }
        }

        CheckpointConfig {
            lineage_id: config.lineage_id.clone(),
            namespace: config.namespace.clone(),
            checkpoint_id: Some(id),
        }
    }

    /// Finds the namespace (within the lineage) holding `checkpoint_id`,
    /// preferring `namespace` itself. Parents usually live in the same
    /// namespace; sub-graph forks may not.
    fn parent_config(
        state: &SaverState,
        lineage_id: &str,
        namespace: &str,
        parent_id: &str,
    ) -> Option<CheckpointConfig> {
        let same_slot = (lineage_id.to_string(), namespace.to_string());
        if state
            .checkpoints
            .get(&same_slot)
            .is_some_and(|m| m.contains_key(parent_id))
        {
            return Some(
                CheckpointConfig::new(lineage_id)
                    .with_namespace(namespace)
                    .with_checkpoint_id(parent_id),
            );
        }
        state
            .checkpoints
            .iter()
            .find(|((lineage, _), map)| lineage == lineage_id && map.contains_key(parent_id))
            .map(|((lineage, ns), _)| {
                CheckpointConfig::new(lineage)
                    .with_namespace(ns)
                    .with_checkpoint_id(parent_id)
            })
    }

    fn tuple_for(
        state: &SaverState,
        config: &CheckpointConfig,
        stored: &StoredCheckpoint,
    ) -> CheckpointTuple {
        let mut writes = stored.writes.clone();
        sort_pending_writes(&mut writes);
        let parent_config = stored.checkpoint.parent_id.as_deref().and_then(|parent| {
            Self::parent_config(state, &config.lineage_id, &config.namespace, parent)
        });
        CheckpointTuple {
            config: CheckpointConfig {
                lineage_id: config.lineage_id.clone(),
                namespace: config.namespace.clone(),
                checkpoint_id: Some(stored.checkpoint.id.clone()),
            },
            checkpoint: stored.checkpoint.clone(),
            metadata: stored.metadata.clone(),
            pending_writes: writes,
            parent_config,
        }
    }
}

impl Default for MemorySaver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointSaver for MemorySaver {
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: HashMap<String, i64>,
    ) -> Result<CheckpointConfig, CheckpointError> {
        validate_put(config, &checkpoint)?;
        let mut checkpoint = checkpoint;
        checkpoint.channel_versions.extend(new_versions);

        let mut state = self.state.write().await;
        // Re-putting an id replaces the snapshot in place and keeps its writes.
        let existing_writes = state
            .checkpoints
            .get(&Self::slot_key(config))
            .and_then(|m| m.get(&checkpoint.id))
            .map(|s| s.writes.clone())
            .unwrap_or_default();
        Ok(self.store(&mut state, config, checkpoint, metadata, existing_writes))
    }

    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<PendingWrite>,
        task_id: &str,
        task_path: &str,
    ) -> Result<(), CheckpointError> {
        if config.lineage_id.is_empty() {
            return Err(CheckpointError::LineageRequired);
        }
        let checkpoint_id = config
            .checkpoint_id
            .as_deref()
            .ok_or(CheckpointError::CheckpointIdRequired)?;
        let stamped = stamp_writes(writes, task_id, task_path);

        let mut state = self.state.write().await;
        let stored = state
            .checkpoints
            .get_mut(&Self::slot_key(config))
            .and_then(|m| m.get_mut(checkpoint_id))
            .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.to_string()))?;
        stored.writes.extend(stamped);
        Ok(())
    }

    async fn put_full(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        writes: Vec<PendingWrite>,
    ) -> Result<CheckpointConfig, CheckpointError> {
        validate_put(config, &checkpoint)?;
        // Single write-lock section: checkpoint and writes land together.
        let mut state = self.state.write().await;
        Ok(self.store(&mut state, config, checkpoint, metadata, writes))
    }

    async fn get_tuple(
        &self,
        config: &CheckpointConfig,
    ) -> Result<Option<CheckpointTuple>, CheckpointError> {
        if config.lineage_id.is_empty() {
            return Err(CheckpointError::LineageRequired);
        }
        let state = self.state.read().await;
        let slot = Self::slot_key(config);
        let id = match config.checkpoint_id {
            Some(ref id) => id.clone(),
            None => match state.ts_index.get(&slot).and_then(|index| index.last()) {
                Some((_, id)) => id.clone(),
                None => return Ok(None),
            },
        };
        Ok(state
            .checkpoints
            .get(&slot)
            .and_then(|m| m.get(&id))
            .map(|stored| Self::tuple_for(&state, config, stored)))
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        filter: Option<ListFilter>,
    ) -> Result<Vec<CheckpointTuple>, CheckpointError> {
        if config.lineage_id.is_empty() {
            return Err(CheckpointError::LineageRequired);
        }
        let filter = filter.unwrap_or_default();
        let state = self.state.read().await;
        let slot = Self::slot_key(config);
        let Some(index) = state.ts_index.get(&slot) else {
            return Ok(Vec::new());
        };

        let before_ts = match filter.before {
            Some(ref before) => {
                let Some(before_id) = before.checkpoint_id.as_deref() else {
                    return Ok(Vec::new());
                };
                match state
                    .checkpoints
                    .get(&slot)
                    .and_then(|m| m.get(before_id))
                {
                    Some(stored) => Some(stored.checkpoint.timestamp),
                    // Unknown upper bound: nothing is known to be older.
                    None => return Ok(Vec::new()),
                }
            }
            None => None,
        };

        let mut tuples = Vec::new();
        for (timestamp, id) in index.iter().rev() {
            if before_ts.is_some_and(|bound| *timestamp >= bound) {
                continue;
            }
            let Some(stored) = state.checkpoints.get(&slot).and_then(|m| m.get(id)) else {
                continue;
            };
            if !filter.metadata_matches(&stored.metadata) {
                continue;
            }
            tuples.push(Self::tuple_for(&state, config, stored));
            if filter.limit.is_some_and(|limit| tuples.len() >= limit) {
                break;
            }
        }
        Ok(tuples)
    }

    async fn delete_lineage(&self, lineage_id: &str) -> Result<(), CheckpointError> {
        if lineage_id.is_empty() {
            return Err(CheckpointError::LineageRequired);
        }
        let mut state = self.state.write().await;
        state
            .checkpoints
            .retain(|(lineage, _), _| lineage != lineage_id);
        state.ts_index.retain(|(lineage, _), _| lineage != lineage_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(id: &str, ts: i64) -> Checkpoint {
        let mut checkpoint = Checkpoint::new(id);
        checkpoint.timestamp = ts;
        checkpoint
            .channel_values
            .insert("x".into(), serde_json::json!(id));
        checkpoint
    }

    fn config(lineage: &str) -> CheckpointConfig {
        CheckpointConfig::new(lineage)
    }

    /// **Scenario**: Put then get with the returned config round-trips the checkpoint.
    #[tokio::test]
    async fn put_get_roundtrip() {
        let saver = MemorySaver::new();
        let mut stored = checkpoint("c1", 1000);
        stored.parent_id = Some("c0".into());
        let updated = saver
            .put(
                &config("l1"),
                stored.clone(),
                CheckpointMetadata::default(),
                HashMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(updated.checkpoint_id.as_deref(), Some("c1"));

        let found = saver.get(&updated).await.unwrap().unwrap();
        assert_eq!(found.channel_values, stored.channel_values);
        assert_eq!(found.parent_id.as_deref(), Some("c0"));
        assert_eq!(found.timestamp, 1000);
    }

    /// **Scenario**: Get without a checkpoint id returns the latest by timestamp;
    /// empty slots return None without error.
    #[tokio::test]
    async fn get_latest_and_empty() {
        let saver = MemorySaver::new();
        assert!(saver.get_tuple(&config("l1")).await.unwrap().is_none());

        for (id, ts) in [("c1", 100), ("c3", 300), ("c2", 200)] {
            saver
                .put(
                    &config("l1"),
                    checkpoint(id, ts),
                    CheckpointMetadata::default(),
                    HashMap::new(),
                )
                .await
                .unwrap();
        }
        let latest = saver.get_tuple(&config("l1")).await.unwrap().unwrap();
        assert_eq!(latest.checkpoint.id, "c3");
    }

    /// **Scenario**: List is strictly decreasing by timestamp; before excludes
    /// the reference and everything newer; unknown before yields empty.
    #[tokio::test]
    async fn list_ordering_and_before() {
        let saver = MemorySaver::new();
        for (id, ts) in [("c1", 100), ("c2", 200), ("c3", 300)] {
            saver
                .put(
                    &config("l1"),
                    checkpoint(id, ts),
                    CheckpointMetadata::default(),
                    HashMap::new(),
                )
                .await
                .unwrap();
        }

        let all = saver.list(&config("l1"), None).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|t| t.checkpoint.id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "c2", "c1"]);

        let filter = ListFilter::new().with_before(config("l1").with_checkpoint_id("c2"));
        let windowed = saver.list(&config("l1"), Some(filter)).await.unwrap();
        let ids: Vec<&str> = windowed.iter().map(|t| t.checkpoint.id.as_str()).collect();
        assert_eq!(ids, vec!["c1"]);

        let unknown = ListFilter::new().with_before(config("l1").with_checkpoint_id("ghost"));
        assert!(saver.list(&config("l1"), Some(unknown)).await.unwrap().is_empty());
    }

    /// **Scenario**: With a cap of 2, the third put evicts the oldest
    /// checkpoint and its writes.
    #[tokio::test]
    async fn eviction_keeps_most_recent() {
        let saver = MemorySaver::new().with_max_checkpoints_per_lineage(2);
        for (id, ts) in [("c1", 100), ("c2", 200), ("c3", 300)] {
            let updated = saver
                .put(
                    &config("l1"),
                    checkpoint(id, ts),
                    CheckpointMetadata::default(),
                    HashMap::new(),
                )
                .await
                .unwrap();
            saver
                .put_writes(
                    &updated,
                    vec![PendingWrite {
                        channel: "x".into(),
                        value: serde_json::json!(1),
                        ..PendingWrite::default()
                    }],
                    "t1",
                    "",
                )
                .await
                .unwrap();
        }

        let remaining = saver.list(&config("l1"), None).await.unwrap();
        let ids: Vec<&str> = remaining.iter().map(|t| t.checkpoint.id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "c2"]);

        let evicted = config("l1").with_checkpoint_id("c1");
        assert!(saver.get_tuple(&evicted).await.unwrap().is_none());
    }

    /// **Scenario**: PutFull stores checkpoint and writes together; re-putting
    /// the same id replaces in place; delete_lineage removes everything.
    #[tokio::test]
    async fn put_full_replace_and_delete() {
        let saver = MemorySaver::new();
        let writes = vec![PendingWrite {
            task_id: "t1".into(),
            channel: "x".into(),
            value: serde_json::json!(42),
            ..PendingWrite::default()
        }];
        let updated = saver
            .put_full(
                &config("l1"),
                checkpoint("c1", 1000),
                CheckpointMetadata::default(),
                writes,
            )
            .await
            .unwrap();

        let tuple = saver.get_tuple(&updated).await.unwrap().unwrap();
        assert_eq!(tuple.pending_writes.len(), 1);
        assert_eq!(tuple.pending_writes[0].value, serde_json::json!(42));

        let replacement = vec![PendingWrite {
            task_id: "t2".into(),
            channel: "y".into(),
            value: serde_json::json!(7),
            ..PendingWrite::default()
        }];
        saver
            .put_full(
                &config("l1"),
                checkpoint("c1", 1000),
                CheckpointMetadata::default(),
                replacement,
            )
            .await
            .unwrap();
        let tuple = saver.get_tuple(&updated).await.unwrap().unwrap();
        assert_eq!(tuple.pending_writes.len(), 1);
        assert_eq!(tuple.pending_writes[0].task_id, "t2");
        assert_eq!(saver.list(&config("l1"), None).await.unwrap().len(), 1);

        saver.delete_lineage("l1").await.unwrap();
        assert!(saver.get_tuple(&config("l1")).await.unwrap().is_none());
    }

    /// **Scenario**: Namespaces partition checkpoints within a lineage.
    #[tokio::test]
    async fn namespaces_partition() {
        let saver = MemorySaver::new();
        saver
            .put(
                &config("l1"),
                checkpoint("root", 100),
                CheckpointMetadata::default(),
                HashMap::new(),
            )
            .await
            .unwrap();
        saver
            .put(
                &config("l1").with_namespace("sub"),
                checkpoint("child", 200),
                CheckpointMetadata::default(),
                HashMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(saver.list(&config("l1"), None).await.unwrap().len(), 1);
        let sub = saver
            .list(&config("l1").with_namespace("sub"), None)
            .await
            .unwrap();
        assert_eq!(sub.len(), 1);
        assert_eq!(sub[0].checkpoint.id, "child");
    }

    /// **Scenario**: A parent stored in another namespace is still resolved
    /// into parent_config.
    #[tokio::test]
    async fn parent_resolved_across_namespaces() {
        let saver = MemorySaver::new();
        saver
            .put(
                &config("l1"),
                checkpoint("root", 100),
                CheckpointMetadata::default(),
                HashMap::new(),
            )
            .await
            .unwrap();
        let mut child = checkpoint("child", 200);
        child.parent_id = Some("root".into());
        let updated = saver
            .put(
                &config("l1").with_namespace("sub"),
                child,
                CheckpointMetadata::default(),
                HashMap::new(),
            )
            .await
            .unwrap();

        let tuple = saver.get_tuple(&updated).await.unwrap().unwrap();
        let parent = tuple.parent_config.unwrap();
        assert_eq!(parent.namespace, "");
        assert_eq!(parent.checkpoint_id.as_deref(), Some("root"));
    }
}
