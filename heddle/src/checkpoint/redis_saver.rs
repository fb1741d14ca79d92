//! Redis checkpoint saver. Survives process restarts; keys expire on a
//! configurable TTL.
//!
//! Layout per lineage: one hash per checkpoint (`ckpt:<lineage>:<ns>:<id>`),
//! a timestamp-scored zset per namespace (`ckpt_ts:<lineage>:<ns>`), one hash
//! of pending writes per checkpoint (`writes:<lineage>:<ns>:<id>`), and the
//! set of namespaces per lineage (`lineage_ns:<lineage>`). Multi-key updates
//! run in a pipelined MULTI/EXEC so partial writes never escape.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::checkpoint::checkpoint::{
    sort_pending_writes, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple,
    PendingWrite,
};
use crate::checkpoint::saver::{
    now_nanos, stamp_writes, validate_put, CheckpointError, CheckpointSaver, ListFilter,
};

/// Keys live for seven days unless configured otherwise.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Redis checkpoint saver.
///
/// **Interaction**: Used as `Arc<dyn CheckpointSaver>` in deployments that
/// need checkpoints to outlive the process. No process-local locking;
/// atomicity comes from pipelined transactions.
pub struct RedisSaver {
    connection: ConnectionManager,
    ttl: Duration,
}

impl RedisSaver {
    /// Connects to `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, CheckpointError> {
        let client = redis::Client::open(url)
            .map_err(|e| CheckpointError::Storage(format!("redis client: {}", e)))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| CheckpointError::Storage(format!("redis connect: {}", e)))?;
        Ok(Self::with_connection(connection))
    }

    /// Wraps an existing connection manager.
    pub fn with_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            ttl: DEFAULT_TTL,
        }
    }

    /// Saver over a connection registered under `name` in the instance
    /// registry (configuration glue; an explicit URL takes priority).
    pub fn from_instance(name: &str) -> Result<Self, CheckpointError> {
        let connection = crate::memory::registry::redis_instance(name).ok_or_else(|| {
            CheckpointError::Storage(format!("no redis instance registered as {:?}", name))
        })?;
        Ok(Self::with_connection(connection))
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn ckpt_key(lineage: &str, namespace: &str, id: &str) -> String {
        format!("ckpt:{}:{}:{}", lineage, namespace, id)
    }

    fn ts_key(lineage: &str, namespace: &str) -> String {
        format!("ckpt_ts:{}:{}", lineage, namespace)
    }

    fn writes_key(lineage: &str, namespace: &str, id: &str) -> String {
        format!("writes:{}:{}:{}", lineage, namespace, id)
    }

    fn ns_key(lineage: &str) -> String {
        format!("lineage_ns:{}", lineage)
    }

    fn ttl_secs(&self) -> i64 {
        self.ttl.as_secs() as i64
    }

    /// One atomic pipeline writing the checkpoint hash, its zset entry, the
    /// namespace set membership, optionally replacing the writes hash, and
    /// refreshing every TTL.
    async fn store(
        &self,
        config: &CheckpointConfig,
        checkpoint: &Checkpoint,
        metadata: &CheckpointMetadata,
        writes: Option<&[PendingWrite]>,
    ) -> Result<CheckpointConfig, CheckpointError> {
        let lineage = &config.lineage_id;
        let namespace = &config.namespace;
        let ckpt_key = Self::ckpt_key(lineage, namespace, &checkpoint.id);
        let ts_key = Self::ts_key(lineage, namespace);
        let writes_key = Self::writes_key(lineage, namespace, &checkpoint.id);
        let ns_key = Self::ns_key(lineage);

        let checkpoint_json = serde_json::to_string(checkpoint)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let ts_string = checkpoint.timestamp.to_string();

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset_multiple(
            &ckpt_key,
            &[
                ("checkpoint", checkpoint_json.as_str()),
                ("metadata", metadata_json.as_str()),
                ("ts", ts_string.as_str()),
                (
                    "parent_id",
                    checkpoint.parent_id.as_deref().unwrap_or_default(),
                ),
            ],
        )
        .ignore();
        pipe.zadd(&ts_key, &checkpoint.id, checkpoint.timestamp).ignore();
        pipe.sadd(&ns_key, namespace).ignore();
        if let Some(writes) = writes {
            pipe.del(&writes_key).ignore();
            for (index, write) in writes.iter().enumerate() {
                let field = format!("{}:{}", write.task_id, index);
                let value = serde_json::to_string(write)
                    .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
                pipe.hset(&writes_key, field, value).ignore();
            }
        }
        for key in [&ckpt_key, &ts_key, &writes_key, &ns_key] {
            pipe.expire(key, self.ttl_secs()).ignore();
        }

        let mut conn = self.connection.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| CheckpointError::Storage(format!("redis exec: {}", e)))?;

        Ok(CheckpointConfig {
            lineage_id: lineage.clone(),
            namespace: namespace.clone(),
            checkpoint_id: Some(checkpoint.id.clone()),
        })
    }

    async fn load_tuple(
        &self,
        config: &CheckpointConfig,
        id: &str,
    ) -> Result<Option<CheckpointTuple>, CheckpointError> {
        let lineage = &config.lineage_id;
        let namespace = &config.namespace;
        let mut conn = self.connection.clone();

        let fields: HashMap<String, String> = conn
            .hgetall(Self::ckpt_key(lineage, namespace, id))
            .await
            .map_err(|e| CheckpointError::Storage(format!("redis hgetall: {}", e)))?;
        let Some(checkpoint_json) = fields.get("checkpoint") else {
            return Ok(None);
        };
        let checkpoint: Checkpoint = serde_json::from_str(checkpoint_json)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let metadata: CheckpointMetadata = fields
            .get("metadata")
            .map(|json| serde_json::from_str(json))
            .transpose()
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?
            .unwrap_or_default();

        let raw_writes: HashMap<String, String> = conn
            .hgetall(Self::writes_key(lineage, namespace, id))
            .await
            .map_err(|e| CheckpointError::Storage(format!("redis hgetall writes: {}", e)))?;
        // Field order from a hash is arbitrary; restore arrival order from the
        // `<task_id>:<idx>` field suffix before the sequence sort.
        let mut keyed: Vec<(i64, PendingWrite)> = Vec::with_capacity(raw_writes.len());
        for (field, json) in &raw_writes {
            let index: i64 = field
                .rsplit(':')
                .next()
                .and_then(|suffix| suffix.parse().ok())
                .unwrap_or_default();
            let write: PendingWrite = serde_json::from_str(json)
                .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
            keyed.push((index, write));
        }
        keyed.sort_by_key(|(index, _)| *index);
        let mut writes: Vec<PendingWrite> = keyed.into_iter().map(|(_, write)| write).collect();
        sort_pending_writes(&mut writes);

        let parent_config = match checkpoint.parent_id.as_deref().filter(|p| !p.is_empty()) {
            Some(parent) => self.find_parent_config(lineage, namespace, parent).await?,
            None => None,
        };

        // Touch extends the lineage's lease.
        let mut refresh = redis::pipe();
        for key in [
            Self::ckpt_key(lineage, namespace, id),
            Self::ts_key(lineage, namespace),
            Self::writes_key(lineage, namespace, id),
            Self::ns_key(lineage),
        ] {
            refresh.expire(key, self.ttl_secs()).ignore();
        }
        if let Err(e) = refresh.query_async::<()>(&mut conn).await {
            tracing::debug!("redis ttl refresh failed: {}", e);
        }

        Ok(Some(CheckpointTuple {
            config: CheckpointConfig {
                lineage_id: lineage.clone(),
                namespace: namespace.clone(),
                checkpoint_id: Some(id.to_string()),
            },
            checkpoint,
            metadata,
            pending_writes: writes,
            parent_config,
        }))
    }

    /// Locates the namespace holding the parent id. O(namespace count) per
    /// lineage, which stays small in practice.
    async fn find_parent_config(
        &self,
        lineage: &str,
        namespace: &str,
        parent_id: &str,
    ) -> Result<Option<CheckpointConfig>, CheckpointError> {
        let mut conn = self.connection.clone();
        let same_ns: bool = conn
            .exists(Self::ckpt_key(lineage, namespace, parent_id))
            .await
            .map_err(|e| CheckpointError::Storage(format!("redis exists: {}", e)))?;
        if same_ns {
            return Ok(Some(
                CheckpointConfig::new(lineage)
                    .with_namespace(namespace)
                    .with_checkpoint_id(parent_id),
            ));
        }
        let namespaces: Vec<String> = conn
            .smembers(Self::ns_key(lineage))
            .await
            .map_err(|e| CheckpointError::Storage(format!("redis smembers: {}", e)))?;
        for candidate in namespaces {
            if candidate == namespace {
                continue;
            }
            let found: bool = conn
                .exists(Self::ckpt_key(lineage, &candidate, parent_id))
                .await
                .map_err(|e| CheckpointError::Storage(format!("redis exists: {}", e)))?;
            if found {
                return Ok(Some(
                    CheckpointConfig::new(lineage)
                        .with_namespace(candidate)
                        .with_checkpoint_id(parent_id),
                ));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl CheckpointSaver for RedisSaver {
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
        if checkpoint.timestamp == 0 {
            checkpoint.timestamp = now_nanos();
        }
        self.store(config, &checkpoint, &metadata, None).await
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
        let writes_key = Self::writes_key(&config.lineage_id, &config.namespace, checkpoint_id);

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (index, write) in stamped.iter().enumerate() {
            let field = format!("{}:{}", write.task_id, index);
            let value = serde_json::to_string(write)
                .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
            pipe.hset(&writes_key, field, value).ignore();
        }
        pipe.expire(&writes_key, self.ttl_secs()).ignore();

        let mut conn = self.connection.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| CheckpointError::Storage(format!("redis exec: {}", e)))?;
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
        let mut checkpoint = checkpoint;
        if checkpoint.timestamp == 0 {
            checkpoint.timestamp = now_nanos();
        }
        // Unlike put_writes (array-index default), absent sequences here get
        // now-ns; replay ordering in existing deployments depends on it.
        let mut writes = writes;
        for write in &mut writes {
            if write.sequence == 0 {
                write.sequence = now_nanos();
            }
        }
        self.store(config, &checkpoint, &metadata, Some(&writes)).await
    }

    async fn get_tuple(
        &self,
        config: &CheckpointConfig,
    ) -> Result<Option<CheckpointTuple>, CheckpointError> {
        if config.lineage_id.is_empty() {
            return Err(CheckpointError::LineageRequired);
        }
        let id = match config.checkpoint_id {
            Some(ref id) => id.clone(),
            None => {
                let mut conn = self.connection.clone();
                let newest: Vec<String> = conn
                    .zrevrange(Self::ts_key(&config.lineage_id, &config.namespace), 0, 0)
                    .await
                    .map_err(|e| CheckpointError::Storage(format!("redis zrevrange: {}", e)))?;
                match newest.into_iter().next() {
                    Some(id) => id,
                    None => return Ok(None),
                }
            }
        };
        self.load_tuple(config, &id).await
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
        let ts_key = Self::ts_key(&config.lineage_id, &config.namespace);
        let mut conn = self.connection.clone();

        let ids: Vec<String> = match filter.before {
            Some(ref before) => {
                let Some(before_id) = before.checkpoint_id.as_deref() else {
                    return Ok(Vec::new());
                };
                let before_ts: Option<String> = conn
                    .hget(
                        Self::ckpt_key(&config.lineage_id, &config.namespace, before_id),
                        "ts",
                    )
                    .await
                    .map_err(|e| CheckpointError::Storage(format!("redis hget: {}", e)))?;
                let Some(before_ts) = before_ts else {
                    // Unknown upper bound: nothing is known to be older.
                    return Ok(Vec::new());
                };
                let ascending: Vec<String> = conn
                    .zrangebyscore(&ts_key, "-inf", format!("({}", before_ts))
                    .await
                    .map_err(|e| CheckpointError::Storage(format!("redis zrangebyscore: {}", e)))?;
                ascending.into_iter().rev().collect()
            }
            None => conn
                .zrevrange(&ts_key, 0, -1)
                .await
                .map_err(|e| CheckpointError::Storage(format!("redis zrevrange: {}", e)))?,
        };

        let mut tuples = Vec::new();
        for id in ids {
            let Some(tuple) = self.load_tuple(config, &id).await? else {
                continue;
            };
            if !filter.metadata_matches(&tuple.metadata) {
                continue;
            }
            tuples.push(tuple);
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
        let mut conn = self.connection.clone();
        let namespaces: Vec<String> = conn
            .smembers(Self::ns_key(lineage_id))
            .await
            .map_err(|e| CheckpointError::Storage(format!("redis smembers: {}", e)))?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for namespace in &namespaces {
            let ts_key = Self::ts_key(lineage_id, namespace);
            let ids: Vec<String> = conn
                .zrange(&ts_key, 0, -1)
                .await
                .map_err(|e| CheckpointError::Storage(format!("redis zrange: {}", e)))?;
            for id in ids {
                pipe.del(Self::ckpt_key(lineage_id, namespace, &id)).ignore();
                pipe.del(Self::writes_key(lineage_id, namespace, &id)).ignore();
            }
            pipe.del(ts_key).ignore();
        }
        pipe.del(Self::ns_key(lineage_id)).ignore();

        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| CheckpointError::Storage(format!("redis exec: {}", e)))?;
        Ok(())
    }
}
