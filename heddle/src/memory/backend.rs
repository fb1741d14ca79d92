//! Storage backend contract shared by all memory stores.
//!
//! Backends own persistence semantics (soft delete, quota, ordering); the
//! facade layers the tool surface and the worker pool on top and is what
//! callers see as [`crate::memory::MemoryService`].

use async_trait::async_trait;

use crate::memory::entry::{MemoryEntry, MemoryKey, UserKey};
use crate::memory::service::MemoryError;

/// Write-time policies every backend honors.
#[derive(Clone, Debug)]
pub struct BackendPolicy {
    /// When true, deletes set `deleted_at` and reads filter it; when false,
    /// deletes are physical.
    pub soft_delete: bool,
    /// Per-user cap on live entries; `add` fails with quota_exceeded at the cap.
    pub memory_limit: Option<usize>,
}

impl Default for BackendPolicy {
    fn default() -> Self {
        Self {
            soft_delete: true,
            memory_limit: None,
        }
    }
}

impl BackendPolicy {
    /// Fails with [`MemoryError::QuotaExceeded`] when `live_count` has reached
    /// the configured limit.
    pub fn check_quota(&self, live_count: usize) -> Result<(), MemoryError> {
        if let Some(limit) = self.memory_limit {
            if live_count >= limit {
                return Err(MemoryError::QuotaExceeded {
                    count: live_count,
                    limit,
                });
            }
        }
        Ok(())
    }
}

/// Memory storage backend: in-process map, MySQL, Postgres, Redis, or vector.
///
/// Every method validates its key before touching storage. Reads hide
/// soft-deleted rows and order by `updated_at DESC, created_at DESC`.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Upserts by content-addressed id, preserving `created_at` on re-add.
    /// Counts live rows against the quota before inserting a new id.
    async fn add(
        &self,
        key: &UserKey,
        text: String,
        topics: Vec<String>,
    ) -> Result<MemoryEntry, MemoryError>;

    /// Replaces an existing entry's memory; `not_found` when the id is absent
    /// or hidden.
    async fn update(
        &self,
        key: &MemoryKey,
        text: String,
        topics: Vec<String>,
    ) -> Result<MemoryEntry, MemoryError>;

    async fn delete(&self, key: &MemoryKey) -> Result<(), MemoryError>;

    async fn clear(&self, key: &UserKey) -> Result<(), MemoryError>;

    async fn read(&self, key: &UserKey, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError>;

    async fn search(&self, key: &UserKey, query: &str) -> Result<Vec<MemoryEntry>, MemoryError>;

    /// Releases pools and connections. Idempotent.
    async fn close(&self) -> Result<(), MemoryError>;
}
