//! Redis memory backend.
//!
//! One hash per user (`memory:<app>:<user>`), field = memory id, value =
//! entry JSON. Soft delete rewrites the entry with `deleted_at` set; reads
//! filter tombstones and sort in memory.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::memory::backend::{BackendPolicy, MemoryBackend};
use crate::memory::entry::{generate_id, Memory, MemoryEntry, MemoryKey, UserKey};
use crate::memory::matcher::entry_matches;
use crate::memory::service::{sort_entries_most_recent_first, MemoryError, DEFAULT_READ_LIMIT};

/// Redis-backed memory store.
///
/// **Interaction**: Built by the facade when a Redis URL or instance is
/// configured; the connection manager reconnects transparently.
pub struct RedisBackend {
    connection: ConnectionManager,
    policy: BackendPolicy,
}

impl RedisBackend {
    /// Connects to `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str, policy: BackendPolicy) -> Result<Self, MemoryError> {
        let client = redis::Client::open(url)
            .map_err(|e| MemoryError::Storage(format!("redis client: {}", e)))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| MemoryError::Storage(format!("redis connect: {}", e)))?;
        Ok(Self::with_connection(connection, policy))
    }

    /// Wraps an existing connection manager (e.g. from the instance registry).
    pub fn with_connection(connection: ConnectionManager, policy: BackendPolicy) -> Self {
        Self { connection, policy }
    }

    fn user_hash_key(key: &UserKey) -> String {
        format!("memory:{}:{}", key.app_name, key.user_id)
    }

    async fn load_all(&self, key: &UserKey) -> Result<Vec<MemoryEntry>, MemoryError> {
        let mut conn = self.connection.clone();
        let raw: HashMap<String, String> = conn
            .hgetall(Self::user_hash_key(key))
            .await
            .map_err(|e| MemoryError::Storage(format!("redis hgetall: {}", e)))?;
        let mut entries = Vec::with_capacity(raw.len());
        for (id, json) in raw {
            match serde_json::from_str::<MemoryEntry>(&json) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("skipping undecodable memory {}: {}", id, e),
            }
        }
        Ok(entries)
    }

    async fn store_entry(&self, key: &UserKey, entry: &MemoryEntry) -> Result<(), MemoryError> {
        let json = serde_json::to_string(entry)
            .map_err(|e| MemoryError::Storage(format!("encode entry: {}", e)))?;
        let mut conn = self.connection.clone();
        let _: () = conn
            .hset(Self::user_hash_key(key), &entry.id, json)
            .await
            .map_err(|e| MemoryError::Storage(format!("redis hset: {}", e)))?;
        Ok(())
    }

    async fn load_entry(&self, key: &MemoryKey) -> Result<Option<MemoryEntry>, MemoryError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .hget(Self::user_hash_key(&key.user_key()), &key.memory_id)
            .await
            .map_err(|e| MemoryError::Storage(format!("redis hget: {}", e)))?;
        raw.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| MemoryError::Storage(format!("decode entry: {}", e)))
        })
        .transpose()
    }
}

#[async_trait]
impl MemoryBackend for RedisBackend {
    async fn add(
        &self,
        key: &UserKey,
        text: String,
        topics: Vec<String>,
    ) -> Result<MemoryEntry, MemoryError> {
        key.validate()?;
        let existing = self.load_all(key).await?;
        let live_count = existing.iter().filter(|e| e.is_live()).count();
        self.policy.check_quota(live_count)?;

        let memory = Memory::new(text, topics);
        let id = generate_id(&memory);

        let entry = match existing.into_iter().find(|e| e.id == id && e.is_live()) {
            Some(mut found) => {
                found.memory = memory;
                found.updated_at = Utc::now();
                found
            }
            None => MemoryEntry::new(key, memory),
        };
        self.store_entry(key, &entry).await?;
        Ok(entry)
    }

    async fn update(
        &self,
        key: &MemoryKey,
        text: String,
        topics: Vec<String>,
    ) -> Result<MemoryEntry, MemoryError> {
        key.validate()?;
        let mut entry = self
            .load_entry(key)
            .await?
            .filter(|e| e.is_live())
            .ok_or_else(|| MemoryError::NotFound(key.memory_id.clone()))?;
        entry.memory = Memory::new(text, topics);
        entry.updated_at = Utc::now();
        self.store_entry(&key.user_key(), &entry).await?;
        Ok(entry)
    }

    async fn delete(&self, key: &MemoryKey) -> Result<(), MemoryError> {
        key.validate()?;
        if self.policy.soft_delete {
            let Some(mut entry) = self.load_entry(key).await? else {
                return Ok(());
            };
            entry.deleted_at.get_or_insert_with(Utc::now);
            self.store_entry(&key.user_key(), &entry).await?;
        } else {
            let mut conn = self.connection.clone();
            let _: () = conn
                .hdel(Self::user_hash_key(&key.user_key()), &key.memory_id)
                .await
                .map_err(|e| MemoryError::Storage(format!("delete_memory: {}", e)))?;
        }
        Ok(())
    }

    async fn clear(&self, key: &UserKey) -> Result<(), MemoryError> {
        key.validate()?;
        if self.policy.soft_delete {
            let now = Utc::now();
            for mut entry in self.load_all(key).await? {
                if entry.is_live() {
                    entry.deleted_at = Some(now);
                    self.store_entry(key, &entry).await?;
                }
            }
        } else {
            let mut conn = self.connection.clone();
            let _: () = conn
                .del(Self::user_hash_key(key))
                .await
                .map_err(|e| MemoryError::Storage(format!("clear_memories: {}", e)))?;
        }
        Ok(())
    }

    async fn read(&self, key: &UserKey, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        key.validate()?;
        let limit = if limit == 0 { DEFAULT_READ_LIMIT } else { limit };
        let mut entries: Vec<MemoryEntry> = self
            .load_all(key)
            .await?
            .into_iter()
            .filter(|e| e.is_live())
            .collect();
        sort_entries_most_recent_first(&mut entries);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn search(&self, key: &UserKey, query: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        key.validate()?;
        let mut entries: Vec<MemoryEntry> = self
            .load_all(key)
            .await?
            .into_iter()
            .filter(|e| e.is_live() && entry_matches(e, query))
            .collect();
        sort_entries_most_recent_first(&mut entries);
        Ok(entries)
    }

    async fn close(&self) -> Result<(), MemoryError> {
        // ConnectionManager has no explicit shutdown; dropping the last clone
        // closes the underlying connection.
        Ok(())
    }
}
