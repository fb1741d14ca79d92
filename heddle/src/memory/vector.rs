//! Vector memory backend: embedder-backed semantic search. Not persistent.
//!
//! `add` writes the entry and its embedding in one write-lock section so a
//! reader never sees one without the other. `search` embeds the query and
//! returns the cosine-similarity top-k instead of running the token matcher.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::memory::backend::{BackendPolicy, MemoryBackend};
use crate::memory::embedder::Embedder;
use crate::memory::entry::{generate_id, Memory, MemoryEntry, MemoryKey, UserKey};
use crate::memory::service::{sort_entries_most_recent_first, MemoryError, DEFAULT_READ_LIMIT};

/// Default number of hits returned by semantic search.
const DEFAULT_TOP_K: usize = 10;

struct VectorRecord {
    entry: MemoryEntry,
    embedding: Vec<f32>,
}

/// Embedder-backed memory store with cosine-similarity search.
///
/// **Interaction**: Built by the facade when an embedder is configured;
/// otherwise behaves like the in-process backend for writes.
pub struct VectorBackend {
    records: RwLock<HashMap<UserKey, HashMap<String, VectorRecord>>>,
    embedder: Arc<dyn Embedder>,
    policy: BackendPolicy,
    top_k: usize,
}

impl VectorBackend {
    pub fn new(embedder: Arc<dyn Embedder>, policy: BackendPolicy) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            embedder,
            policy,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let mut vectors = self.embedder.embed(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| MemoryError::Upstream("embedder returned no vector".into()))
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }
}

#[async_trait]
impl MemoryBackend for VectorBackend {
    async fn add(
        &self,
        key: &UserKey,
        text: String,
        topics: Vec<String>,
    ) -> Result<MemoryEntry, MemoryError> {
        key.validate()?;
        let memory = Memory::new(text, topics);
        let id = generate_id(&memory);
        // Embed outside the lock; entry and vector land together under it.
        let embedding = self.embed_one(&memory.text).await?;

        let mut guard = self.records.write().await;
        let user_records = guard.entry(key.clone()).or_default();
        let live_count = user_records.values().filter(|r| r.entry.is_live()).count();
        self.policy.check_quota(live_count)?;

        if let Some(record) = user_records.get_mut(&id) {
            if record.entry.is_live() {
                record.entry.memory = memory;
                record.entry.updated_at = Utc::now();
                record.embedding = embedding;
                return Ok(record.entry.clone());
            }
        }
        let entry = MemoryEntry::new(key, memory);
        user_records.insert(
            id,
            VectorRecord {
                entry: entry.clone(),
                embedding,
            },
        );
        Ok(entry)
    }

    async fn update(
        &self,
        key: &MemoryKey,
        text: String,
        topics: Vec<String>,
    ) -> Result<MemoryEntry, MemoryError> {
        key.validate()?;
        let memory = Memory::new(text, topics);
        let embedding = self.embed_one(&memory.text).await?;

        let mut guard = self.records.write().await;
        let record = guard
            .get_mut(&key.user_key())
            .and_then(|m| m.get_mut(&key.memory_id))
            .filter(|r| r.entry.is_live())
            .ok_or_else(|| MemoryError::NotFound(key.memory_id.clone()))?;
        record.entry.memory = memory;
        record.entry.updated_at = Utc::now();
        record.embedding = embedding;
        Ok(record.entry.clone())
    }

    async fn delete(&self, key: &MemoryKey) -> Result<(), MemoryError> {
        key.validate()?;
        let mut guard = self.records.write().await;
        let Some(user_records) = guard.get_mut(&key.user_key()) else {
            return Ok(());
        };
        if self.policy.soft_delete {
            if let Some(record) = user_records.get_mut(&key.memory_id) {
                record.entry.deleted_at.get_or_insert_with(Utc::now);
            }
        } else {
            user_records.remove(&key.memory_id);
        }
        Ok(())
    }

    async fn clear(&self, key: &UserKey) -> Result<(), MemoryError> {
        key.validate()?;
        let mut guard = self.records.write().await;
        let Some(user_records) = guard.get_mut(key) else {
            return Ok(());
        };
        if self.policy.soft_delete {
            let now = Utc::now();
            for record in user_records.values_mut() {
                record.entry.deleted_at.get_or_insert(now);
            }
        } else {
            user_records.clear();
        }
        Ok(())
    }

    async fn read(&self, key: &UserKey, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        key.validate()?;
        let limit = if limit == 0 { DEFAULT_READ_LIMIT } else { limit };
        let guard = self.records.read().await;
        let mut entries: Vec<MemoryEntry> = guard
            .get(key)
            .map(|m| {
                m.values()
                    .filter(|r| r.entry.is_live())
                    .map(|r| r.entry.clone())
                    .collect()
            })
            .unwrap_or_default();
        sort_entries_most_recent_first(&mut entries);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn search(&self, key: &UserKey, query: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        key.validate()?;
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query_vector = self.embed_one(query).await?;
        let guard = self.records.read().await;
        let mut scored: Vec<(f32, MemoryEntry)> = guard
            .get(key)
            .map(|m| {
                m.values()
                    .filter(|r| r.entry.is_live())
                    .map(|r| {
                        (
                            Self::cosine_similarity(&query_vector, &r.embedding),
                            r.entry.clone(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.top_k);
        Ok(scored.into_iter().map(|(_, entry)| entry).collect())
    }

    async fn close(&self) -> Result<(), MemoryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::embedder::MockEmbedder;

    fn backend() -> VectorBackend {
        VectorBackend::new(Arc::new(MockEmbedder::new(8)), BackendPolicy::default())
    }

    fn user() -> UserKey {
        UserKey::new("app", "u1")
    }

    /// **Scenario**: Search returns the stored entry most similar to the query first.
    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let backend = backend();
        backend
            .add(&user(), "Alice likes coffee".into(), vec![])
            .await
            .unwrap();
        backend
            .add(&user(), "zzzzzz".into(), vec![])
            .await
            .unwrap();

        let hits = backend.search(&user(), "Alice likes coffee").await.unwrap();
        assert_eq!(hits[0].memory.text, "Alice likes coffee");
    }

    /// **Scenario**: Soft-deleted entries are excluded from semantic search.
    #[tokio::test]
    async fn search_skips_deleted() {
        let backend = backend();
        let entry = backend
            .add(&user(), "secret fact".into(), vec![])
            .await
            .unwrap();
        backend
            .delete(&MemoryKey::from_user(&user(), entry.id))
            .await
            .unwrap();
        assert!(backend.search(&user(), "secret fact").await.unwrap().is_empty());
    }

    /// **Scenario**: Cosine similarity of identical vectors is 1, orthogonal is 0.
    #[test]
    fn cosine_similarity_bounds() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        assert!((VectorBackend::cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(VectorBackend::cosine_similarity(&a, &b), 0.0);
        assert_eq!(VectorBackend::cosine_similarity(&a, &[0.0, 0.0]), 0.0);
    }
}
