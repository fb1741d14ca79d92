//! In-process memory backend. Not persistent.
//!
//! Entries live in a `RwLock<HashMap>` keyed by user, then by memory id.
//! Search runs the keyword matcher over live entries in memory.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::memory::backend::{BackendPolicy, MemoryBackend};
use crate::memory::entry::{generate_id, Memory, MemoryEntry, MemoryKey, UserKey};
use crate::memory::matcher::entry_matches;
use crate::memory::service::{sort_entries_most_recent_first, MemoryError, DEFAULT_READ_LIMIT};

/// In-process memory backend.
///
/// **Interaction**: Wrapped by the facade as `Arc<dyn MemoryBackend>`; the
/// default backend when no DSN, instance, or Redis URL is configured.
pub struct InMemoryBackend {
    entries: RwLock<HashMap<UserKey, HashMap<String, MemoryEntry>>>,
    policy: BackendPolicy,
}

impl InMemoryBackend {
    pub fn new(policy: BackendPolicy) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            policy,
        }
    }

    fn live_count(user_entries: &HashMap<String, MemoryEntry>) -> usize {
        user_entries.values().filter(|e| e.is_live()).count()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(BackendPolicy::default())
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    async fn add(
        &self,
        key: &UserKey,
        text: String,
        topics: Vec<String>,
    ) -> Result<MemoryEntry, MemoryError> {
        key.validate()?;
        let memory = Memory::new(text, topics);
        let id = generate_id(&memory);

        let mut guard = self.entries.write().await;
        let user_entries = guard.entry(key.clone()).or_default();
        self.policy.check_quota(Self::live_count(user_entries))?;

        if let Some(existing) = user_entries.get_mut(&id) {
            if existing.is_live() {
                existing.memory = memory;
                existing.updated_at = Utc::now();
                return Ok(existing.clone());
            }
        }

        let entry = MemoryEntry::new(key, memory);
        user_entries.insert(id, entry.clone());
        Ok(entry)
    }

    async fn update(
        &self,
        key: &MemoryKey,
        text: String,
        topics: Vec<String>,
    ) -> Result<MemoryEntry, MemoryError> {
        key.validate()?;
        let mut guard = self.entries.write().await;
        let user_entries = guard
            .get_mut(&key.user_key())
            .ok_or_else(|| MemoryError::NotFound(key.memory_id.clone()))?;
        let entry = user_entries
            .get_mut(&key.memory_id)
            .filter(|e| e.is_live())
            .ok_or_else(|| MemoryError::NotFound(key.memory_id.clone()))?;
        entry.memory = Memory::new(text, topics);
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn delete(&self, key: &MemoryKey) -> Result<(), MemoryError> {
        key.validate()?;
        let mut guard = self.entries.write().await;
        let Some(user_entries) = guard.get_mut(&key.user_key()) else {
            return Ok(());
        };
        if self.policy.soft_delete {
            if let Some(entry) = user_entries.get_mut(&key.memory_id) {
                entry.deleted_at = Some(Utc::now());
            }
        } else {
            user_entries.remove(&key.memory_id);
        }
        Ok(())
    }

    async fn clear(&self, key: &UserKey) -> Result<(), MemoryError> {
        key.validate()?;
        let mut guard = self.entries.write().await;
        let Some(user_entries) = guard.get_mut(key) else {
            return Ok(());
        };
        if self.policy.soft_delete {
            let now = Utc::now();
            for entry in user_entries.values_mut() {
                entry.deleted_at.get_or_insert(now);
            }
        } else {
            user_entries.clear();
        }
        Ok(())
    }

    async fn read(&self, key: &UserKey, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        key.validate()?;
        let limit = if limit == 0 { DEFAULT_READ_LIMIT } else { limit };
        let guard = self.entries.read().await;
        let mut entries: Vec<MemoryEntry> = guard
            .get(key)
            .map(|m| m.values().filter(|e| e.is_live()).cloned().collect())
            .unwrap_or_default();
        sort_entries_most_recent_first(&mut entries);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn search(&self, key: &UserKey, query: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        key.validate()?;
        let guard = self.entries.read().await;
        let mut entries: Vec<MemoryEntry> = guard
            .get(key)
            .map(|m| {
                m.values()
                    .filter(|e| e.is_live() && entry_matches(e, query))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        sort_entries_most_recent_first(&mut entries);
        Ok(entries)
    }

    async fn close(&self) -> Result<(), MemoryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserKey {
        UserKey::new("app", "u1")
    }

    /// **Scenario**: Add then search by keyword returns the entry; delete hides it.
    #[tokio::test]
    async fn add_search_delete_roundtrip() {
        let backend = InMemoryBackend::default();
        let entry = backend
            .add(&user(), "Alice likes coffee".into(), vec!["profile".into()])
            .await
            .unwrap();

        let hits = backend.search(&user(), "coffee").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory.text, "Alice likes coffee");

        let key = MemoryKey::from_user(&user(), entry.id.clone());
        backend.delete(&key).await.unwrap();
        assert!(backend.search(&user(), "coffee").await.unwrap().is_empty());
        assert!(backend.read(&user(), 0).await.unwrap().is_empty());
    }

    /// **Scenario**: Re-adding identical content keeps one live row and preserves created_at.
    #[tokio::test]
    async fn add_is_idempotent() {
        let backend = InMemoryBackend::default();
        let first = backend
            .add(&user(), "x".into(), vec!["t".into()])
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = backend
            .add(&user(), "x".into(), vec!["t".into()])
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(backend.read(&user(), 0).await.unwrap().len(), 1);
    }

    /// **Scenario**: The (N+1)-th add fails with quota_exceeded and the store stays at N.
    #[tokio::test]
    async fn quota_blocks_overflow() {
        let backend = InMemoryBackend::new(BackendPolicy {
            soft_delete: true,
            memory_limit: Some(2),
        });
        backend.add(&user(), "one".into(), vec![]).await.unwrap();
        backend.add(&user(), "two".into(), vec![]).await.unwrap();
        let err = backend.add(&user(), "three".into(), vec![]).await.unwrap_err();
        assert!(matches!(err, MemoryError::QuotaExceeded { limit: 2, .. }));
        assert_eq!(backend.read(&user(), 0).await.unwrap().len(), 2);
    }

    /// **Scenario**: With soft delete off, delete removes the row physically.
    #[tokio::test]
    async fn hard_delete_removes_row() {
        let backend = InMemoryBackend::new(BackendPolicy {
            soft_delete: false,
            memory_limit: None,
        });
        let entry = backend.add(&user(), "gone soon".into(), vec![]).await.unwrap();
        backend
            .delete(&MemoryKey::from_user(&user(), entry.id))
            .await
            .unwrap();
        let guard = backend.entries.read().await;
        assert!(guard.get(&user()).map(|m| m.is_empty()).unwrap_or(true));
    }

    /// **Scenario**: Update of a missing id fails with not_found.
    #[tokio::test]
    async fn update_missing_is_not_found() {
        let backend = InMemoryBackend::default();
        let err = backend
            .update(&MemoryKey::from_user(&user(), "nope"), "x".into(), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
    }

    /// **Scenario**: Empty user id fails validation before any storage access.
    #[tokio::test]
    async fn empty_key_rejected() {
        let backend = InMemoryBackend::default();
        let err = backend
            .add(&UserKey::new("app", ""), "x".into(), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidKey(_)));
    }

    /// **Scenario**: Read orders by updated_at descending and honors the limit.
    #[tokio::test]
    async fn read_orders_and_limits() {
        let backend = InMemoryBackend::default();
        backend.add(&user(), "first".into(), vec![]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        backend.add(&user(), "second".into(), vec![]).await.unwrap();

        let entries = backend.read(&user(), 1).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].memory.text, "second");
    }
}
