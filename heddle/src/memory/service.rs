//! Memory service contract and error type.
//!
//! Every backend (in-process, MySQL, Postgres, Redis, vector) implements
//! [`MemoryService`]; callers hold it as `Arc<dyn MemoryService>`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::memory::entry::{MemoryEntry, MemoryKey, UserKey};
use crate::memory::worker::MemoryJob;
use crate::tools::Tool;

/// Default cap on entries returned by `read_memories` when the caller passes no limit.
pub const DEFAULT_READ_LIMIT: usize = 50;

/// Error type for memory operations.
///
/// Validation errors surface before any I/O; storage errors are wrapped with
/// the failing operation's name by the backend.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("quota exceeded: user has {count} memories, limit {limit}")]
    QuotaExceeded { count: usize, limit: usize },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("upstream: {0}")]
    Upstream(String),
    #[error("cancelled")]
    Cancelled,
    #[error("timeout: {0}")]
    Timeout(String),
}

/// Memory service: persistence and search for extracted user memories.
///
/// Reads hide soft-deleted rows; `read_memories` and `search_memories` return
/// entries ordered by `updated_at DESC, created_at DESC`.
///
/// **Interaction**: Held as `Arc<dyn MemoryService>` by the tool surface, the
/// auto-memory worker pool, and the A2A processor.
#[async_trait]
pub trait MemoryService: Send + Sync {
    /// Stores a memory. Idempotent: re-adding identical `(text, topics)`
    /// updates the existing row in place, preserving `created_at`.
    async fn add_memory(
        &self,
        key: &UserKey,
        text: String,
        topics: Vec<String>,
    ) -> Result<MemoryEntry, MemoryError>;

    /// Replaces the memory content of an existing entry.
    async fn update_memory(
        &self,
        key: &MemoryKey,
        text: String,
        topics: Vec<String>,
    ) -> Result<MemoryEntry, MemoryError>;

    /// Deletes one memory (soft when soft delete is enabled).
    async fn delete_memory(&self, key: &MemoryKey) -> Result<(), MemoryError>;

    /// Deletes all memories for a user (soft when soft delete is enabled).
    async fn clear_memories(&self, key: &UserKey) -> Result<(), MemoryError>;

    /// Returns up to `limit` live entries, most recently updated first.
    /// `limit = 0` means [`DEFAULT_READ_LIMIT`].
    async fn read_memories(
        &self,
        key: &UserKey,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, MemoryError>;

    /// Returns live entries matching the query, most recently updated first.
    async fn search_memories(
        &self,
        key: &UserKey,
        query: &str,
    ) -> Result<Vec<MemoryEntry>, MemoryError>;

    /// The tool surface for this service. Precomputed at construction;
    /// implementations return a clone without locking.
    fn tools(&self) -> Vec<Arc<dyn Tool>>;

    /// Enqueues a background extraction job, when the service runs in auto
    /// mode. The default ignores the job (agentic mode has no pool).
    async fn enqueue_auto_memory_job(&self, _job: MemoryJob) -> Result<(), MemoryError> {
        Ok(())
    }

    /// Releases backing resources and joins workers. Idempotent.
    async fn close(&self) -> Result<(), MemoryError>;
}

/// Sorts entries by `updated_at DESC, created_at DESC` (the shared read and
/// search comparator).
pub fn sort_entries_most_recent_first(entries: &mut [MemoryEntry]) {
    entries.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then(b.created_at.cmp(&a.created_at))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::entry::{Memory, MemoryEntry, UserKey};
    use chrono::{Duration, Utc};

    /// **Scenario**: Entries sort by updated_at desc, ties broken by created_at desc.
    #[test]
    fn sort_most_recent_first() {
        let key = UserKey::new("a", "u");
        let now = Utc::now();
        let mut older = MemoryEntry::new(&key, Memory::new("one", vec![]));
        older.created_at = now - Duration::seconds(20);
        older.updated_at = now - Duration::seconds(20);
        let mut newer = MemoryEntry::new(&key, Memory::new("two", vec![]));
        newer.created_at = now - Duration::seconds(10);
        newer.updated_at = now;
        let mut tie = MemoryEntry::new(&key, Memory::new("three", vec![]));
        tie.created_at = now - Duration::seconds(5);
        tie.updated_at = now;

        let mut entries = vec![older.clone(), newer.clone(), tie.clone()];
        sort_entries_most_recent_first(&mut entries);
        assert_eq!(entries[0].memory.text, "three");
        assert_eq!(entries[1].memory.text, "two");
        assert_eq!(entries[2].memory.text, "one");
    }

    /// **Scenario**: Display of each error variant contains its keyword.
    #[test]
    fn memory_error_display() {
        assert!(MemoryError::InvalidKey("user_id required".into())
            .to_string()
            .contains("invalid key"));
        assert!(MemoryError::QuotaExceeded { count: 3, limit: 3 }
            .to_string()
            .contains("quota"));
        assert!(MemoryError::Storage("io".into()).to_string().contains("storage"));
    }
}
