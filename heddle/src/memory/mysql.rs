//! MySQL memory backend over an sqlx pool.
//!
//! Rows hold the full entry as a JSON blob plus timestamp columns; the
//! columns are authoritative for `created_at` / `updated_at` so upserts can
//! preserve creation time without rewriting the blob.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::types::Json;
use sqlx::Row;
use std::time::Duration;

use crate::memory::backend::{BackendPolicy, MemoryBackend};
use crate::memory::entry::{generate_id, Memory, MemoryEntry, MemoryKey, UserKey};
use crate::memory::matcher::entry_matches;
use crate::memory::service::{sort_entries_most_recent_first, MemoryError, DEFAULT_READ_LIMIT};
use crate::memory::sql::{index_names, validate_identifier, MAX_IDENT_MYSQL};

/// Database init (table + index creation and verification) deadline.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// MySQL-backed memory store. Primary key `(app_name, user_id, memory_id)`.
///
/// **Interaction**: Built by the facade when a MySQL DSN or instance is
/// configured; shared across callers through the sqlx connection pool.
pub struct MySqlBackend {
    pool: MySqlPool,
    table: String,
    policy: BackendPolicy,
}

impl MySqlBackend {
    /// Connects to `dsn` and prepares the schema unless `skip_db_init`.
    pub async fn connect(
        dsn: &str,
        table: String,
        policy: BackendPolicy,
        skip_db_init: bool,
    ) -> Result<Self, MemoryError> {
        let pool = MySqlPoolOptions::new()
            .connect(dsn)
            .await
            .map_err(|e| MemoryError::Storage(format!("mysql connect: {}", e)))?;
        Self::with_pool(pool, table, policy, skip_db_init).await
    }

    /// Wraps an existing pool (e.g. from the instance registry).
    pub async fn with_pool(
        pool: MySqlPool,
        table: String,
        policy: BackendPolicy,
        skip_db_init: bool,
    ) -> Result<Self, MemoryError> {
        validate_identifier(&table, MAX_IDENT_MYSQL)?;
        let backend = Self { pool, table, policy };
        if !skip_db_init {
            tokio::time::timeout(INIT_TIMEOUT, backend.init_schema())
                .await
                .map_err(|_| MemoryError::Timeout("mysql schema init".into()))??;
        }
        Ok(backend)
    }

    async fn init_schema(&self) -> Result<(), MemoryError> {
        let [idx_user, idx_deleted, idx_updated] = index_names(&self.table);
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                memory_id   VARCHAR(64)  NOT NULL,
                app_name    VARCHAR(255) NOT NULL,
                user_id     VARCHAR(255) NOT NULL,
                memory_data JSON         NOT NULL,
                created_at  TIMESTAMP(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                updated_at  TIMESTAMP(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                deleted_at  TIMESTAMP(6) NULL,
                PRIMARY KEY (app_name, user_id, memory_id),
                KEY {idx_user} (app_name, user_id),
                KEY {idx_deleted} (deleted_at),
                KEY {idx_updated} (updated_at DESC)
            )",
            t = self.table,
            idx_user = idx_user,
            idx_deleted = idx_deleted,
            idx_updated = idx_updated,
        );
        if let Err(e) = sqlx::query(&ddl).execute(&self.pool).await {
            // Likely a missing DDL privilege; the table may already exist.
            tracing::debug!("mysql ddl skipped: {}", e);
        }
        self.verify_indexes().await;
        Ok(())
    }

    /// Warns (with the DDL to add them) about expected indexes that are
    /// missing. Stays silent when introspection is not permitted.
    async fn verify_indexes(&self) {
        let rows = sqlx::query(
            "SELECT INDEX_NAME FROM information_schema.statistics
             WHERE table_schema = DATABASE() AND table_name = ?
             GROUP BY INDEX_NAME",
        )
        .bind(&self.table)
        .fetch_all(&self.pool)
        .await;
        let present: Vec<String> = match rows {
            Ok(rows) => rows
                .iter()
                .filter_map(|r| r.try_get::<String, _>("INDEX_NAME").ok())
                .collect(),
            Err(e) => {
                tracing::debug!("mysql index verification skipped: {}", e);
                return;
            }
        };
        for (name, columns) in [
            (&index_names(&self.table)[0], "(app_name, user_id)"),
            (&index_names(&self.table)[1], "(deleted_at)"),
            (&index_names(&self.table)[2], "(updated_at DESC)"),
        ] {
            if !present.iter().any(|p| p == name) {
                tracing::warn!(
                    "mysql table {} is missing index {}; add it with: CREATE INDEX {} ON {} {}",
                    self.table,
                    name,
                    name,
                    self.table,
                    columns
                );
            }
        }
    }

    fn entry_from_row(&self, row: &MySqlRow) -> Result<MemoryEntry, MemoryError> {
        let data: Json<MemoryEntry> = row
            .try_get("memory_data")
            .map_err(|e| MemoryError::Storage(format!("memory_data: {}", e)))?;
        let mut entry = data.0;
        entry.created_at = row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(|e| MemoryError::Storage(format!("created_at: {}", e)))?;
        entry.updated_at = row
            .try_get::<DateTime<Utc>, _>("updated_at")
            .map_err(|e| MemoryError::Storage(format!("updated_at: {}", e)))?;
        entry.deleted_at = row
            .try_get::<Option<DateTime<Utc>>, _>("deleted_at")
            .map_err(|e| MemoryError::Storage(format!("deleted_at: {}", e)))?;
        Ok(entry)
    }

    async fn live_count(&self, key: &UserKey) -> Result<usize, MemoryError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE app_name = ? AND user_id = ? AND deleted_at IS NULL",
            self.table
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(&key.app_name)
            .bind(&key.user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("count: {}", e)))?;
        Ok(count as usize)
    }

    async fn fetch_entry(&self, key: &MemoryKey) -> Result<Option<MemoryEntry>, MemoryError> {
        let sql = format!(
            "SELECT memory_data, created_at, updated_at, deleted_at FROM {}
             WHERE app_name = ? AND user_id = ? AND memory_id = ?",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(&key.app_name)
            .bind(&key.user_id)
            .bind(&key.memory_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("get: {}", e)))?;
        row.map(|r| self.entry_from_row(&r)).transpose()
    }
}

#[async_trait]
impl MemoryBackend for MySqlBackend {
    async fn add(
        &self,
        key: &UserKey,
        text: String,
        topics: Vec<String>,
    ) -> Result<MemoryEntry, MemoryError> {
        key.validate()?;
        self.policy.check_quota(self.live_count(key).await?)?;

        let memory = Memory::new(text, topics);
        let id = generate_id(&memory);
        let entry = MemoryEntry::new(key, memory);

        let sql = format!(
            "INSERT INTO {t} (memory_id, app_name, user_id, memory_data)
             VALUES (?, ?, ?, ?)
             ON DUPLICATE KEY UPDATE
                 memory_data = VALUES(memory_data),
                 updated_at = CURRENT_TIMESTAMP(6),
                 deleted_at = NULL",
            t = self.table
        );
        sqlx::query(&sql)
            .bind(&id)
            .bind(&key.app_name)
            .bind(&key.user_id)
            .bind(Json(&entry))
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("add_memory: {}", e)))?;

        self.fetch_entry(&MemoryKey::from_user(key, id.clone()))
            .await?
            .ok_or_else(|| MemoryError::Storage(format!("add_memory: row {} vanished", id)))
    }

    async fn update(
        &self,
        key: &MemoryKey,
        text: String,
        topics: Vec<String>,
    ) -> Result<MemoryEntry, MemoryError> {
        key.validate()?;
        let existing = self
            .fetch_entry(key)
            .await?
            .filter(|e| e.is_live())
            .ok_or_else(|| MemoryError::NotFound(key.memory_id.clone()))?;

        let mut entry = existing;
        entry.memory = Memory::new(text, topics);

        let sql = format!(
            "UPDATE {} SET memory_data = ?, updated_at = CURRENT_TIMESTAMP(6)
             WHERE app_name = ? AND user_id = ? AND memory_id = ? AND deleted_at IS NULL",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(Json(&entry))
            .bind(&key.app_name)
            .bind(&key.user_id)
            .bind(&key.memory_id)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("update_memory: {}", e)))?;
        if result.rows_affected() == 0 {
            return Err(MemoryError::NotFound(key.memory_id.clone()));
        }
        self.fetch_entry(key)
            .await?
            .ok_or_else(|| MemoryError::NotFound(key.memory_id.clone()))
    }

    async fn delete(&self, key: &MemoryKey) -> Result<(), MemoryError> {
        key.validate()?;
        let sql = if self.policy.soft_delete {
            format!(
                "UPDATE {} SET deleted_at = CURRENT_TIMESTAMP(6)
                 WHERE app_name = ? AND user_id = ? AND memory_id = ? AND deleted_at IS NULL",
                self.table
            )
        } else {
            format!(
                "DELETE FROM {} WHERE app_name = ? AND user_id = ? AND memory_id = ?",
                self.table
            )
        };
        sqlx::query(&sql)
            .bind(&key.app_name)
            .bind(&key.user_id)
            .bind(&key.memory_id)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("delete_memory: {}", e)))?;
        Ok(())
    }

    async fn clear(&self, key: &UserKey) -> Result<(), MemoryError> {
        key.validate()?;
        let sql = if self.policy.soft_delete {
            format!(
                "UPDATE {} SET deleted_at = CURRENT_TIMESTAMP(6)
                 WHERE app_name = ? AND user_id = ? AND deleted_at IS NULL",
                self.table
            )
        } else {
            format!(
                "DELETE FROM {} WHERE app_name = ? AND user_id = ?",
                self.table
            )
        };
        sqlx::query(&sql)
            .bind(&key.app_name)
            .bind(&key.user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("clear_memories: {}", e)))?;
        Ok(())
    }

    async fn read(&self, key: &UserKey, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        key.validate()?;
        let limit = if limit == 0 { DEFAULT_READ_LIMIT } else { limit };
        let sql = format!(
            "SELECT memory_data, created_at, updated_at, deleted_at FROM {}
             WHERE app_name = ? AND user_id = ? AND deleted_at IS NULL
             ORDER BY updated_at DESC, created_at DESC
             LIMIT ?",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(&key.app_name)
            .bind(&key.user_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("read_memories: {}", e)))?;
        rows.iter().map(|r| self.entry_from_row(r)).collect()
    }

    async fn search(&self, key: &UserKey, query: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        key.validate()?;
        let sql = format!(
            "SELECT memory_data, created_at, updated_at, deleted_at FROM {}
             WHERE app_name = ? AND user_id = ? AND deleted_at IS NULL",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(&key.app_name)
            .bind(&key.user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("search_memories: {}", e)))?;
        let mut entries: Vec<MemoryEntry> = rows
            .iter()
            .map(|r| self.entry_from_row(r))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|e| entry_matches(e, query))
            .collect();
        sort_entries_most_recent_first(&mut entries);
        Ok(entries)
    }

    async fn close(&self) -> Result<(), MemoryError> {
        self.pool.close().await;
        Ok(())
    }
}
