//! Postgres memory backend over an sqlx pool.
//!
//! Same row shape as the MySQL backend (JSONB blob + authoritative timestamp
//! columns), with optional schema qualification.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::time::Duration;

use crate::memory::backend::{BackendPolicy, MemoryBackend};
use crate::memory::entry::{generate_id, Memory, MemoryEntry, MemoryKey, UserKey};
use crate::memory::matcher::entry_matches;
use crate::memory::service::{sort_entries_most_recent_first, MemoryError, DEFAULT_READ_LIMIT};
use crate::memory::sql::{index_names, validate_identifier, MAX_IDENT_POSTGRES};

const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Postgres-backed memory store. Primary key `(app_name, user_id, memory_id)`.
///
/// **Interaction**: Built by the facade when a Postgres DSN or instance is
/// configured. `schema` scopes the table when set (validated like the table).
#[derive(Debug)]
pub struct PostgresBackend {
    pool: PgPool,
    table: String,
    schema: Option<String>,
    policy: BackendPolicy,
}

impl PostgresBackend {
    /// Connects to `dsn` and prepares the schema unless `skip_db_init`.
    pub async fn connect(
        dsn: &str,
        table: String,
        schema: Option<String>,
        policy: BackendPolicy,
        skip_db_init: bool,
    ) -> Result<Self, MemoryError> {
        let pool = PgPoolOptions::new()
            .connect(dsn)
            .await
            .map_err(|e| MemoryError::Storage(format!("postgres connect: {}", e)))?;
        Self::with_pool(pool, table, schema, policy, skip_db_init).await
    }

    /// Wraps an existing pool (e.g. from the instance registry).
    pub async fn with_pool(
        pool: PgPool,
        table: String,
        schema: Option<String>,
        policy: BackendPolicy,
        skip_db_init: bool,
    ) -> Result<Self, MemoryError> {
        validate_identifier(&table, MAX_IDENT_POSTGRES)?;
        if let Some(ref schema) = schema {
            validate_identifier(schema, MAX_IDENT_POSTGRES)?;
        }
        let backend = Self {
            pool,
            table,
            schema,
            policy,
        };
        if !skip_db_init {
            tokio::time::timeout(INIT_TIMEOUT, backend.init_schema())
                .await
                .map_err(|_| MemoryError::Timeout("postgres schema init".into()))??;
        }
        Ok(backend)
    }

    /// Schema-qualified table reference for statement text.
    fn table_ref(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.table),
            None => self.table.clone(),
        }
    }

    async fn init_schema(&self) -> Result<(), MemoryError> {
        let table_ref = self.table_ref();
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                memory_id   VARCHAR(64)  NOT NULL,
                app_name    VARCHAR(255) NOT NULL,
                user_id     VARCHAR(255) NOT NULL,
                memory_data JSONB        NOT NULL,
                created_at  TIMESTAMPTZ  NOT NULL DEFAULT now(),
                updated_at  TIMESTAMPTZ  NOT NULL DEFAULT now(),
                deleted_at  TIMESTAMPTZ,
                PRIMARY KEY (app_name, user_id, memory_id)
            )",
            t = table_ref
        );
        if let Err(e) = sqlx::query(&ddl).execute(&self.pool).await {
            tracing::debug!("postgres ddl skipped: {}", e);
            self.verify_indexes().await;
            return Ok(());
        }
        let [idx_user, idx_deleted, idx_updated] = index_names(&self.table);
        for (name, columns) in [
            (idx_user, "(app_name, user_id)"),
            (idx_deleted, "(deleted_at)"),
            (idx_updated, "(updated_at DESC)"),
        ] {
            let ddl = format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} {}",
                name, table_ref, columns
            );
            if let Err(e) = sqlx::query(&ddl).execute(&self.pool).await {
                tracing::debug!("postgres index ddl skipped: {}", e);
            }
        }
        self.verify_indexes().await;
        Ok(())
    }

    /// Warns (with the DDL to add them) about expected indexes that are
    /// missing. Stays silent when introspection is not permitted.
    async fn verify_indexes(&self) {
        let schema = self.schema.as_deref().unwrap_or("public");
        let rows = sqlx::query(
            "SELECT indexname FROM pg_indexes WHERE schemaname = $1 AND tablename = $2",
        )
        .bind(schema)
        .bind(&self.table)
        .fetch_all(&self.pool)
        .await;
        let present: Vec<String> = match rows {
            Ok(rows) => rows
                .iter()
                .filter_map(|r| r.try_get::<String, _>("indexname").ok())
                .collect(),
            Err(e) => {
                tracing::debug!("postgres index verification skipped: {}", e);
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
                    "postgres table {} is missing index {}; add it with: CREATE INDEX {} ON {} {}",
                    self.table_ref(),
                    name,
                    name,
                    self.table_ref(),
                    columns
                );
            }
        }
    }

    fn entry_from_row(&self, row: &PgRow) -> Result<MemoryEntry, MemoryError> {
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
            "SELECT COUNT(*) FROM {} WHERE app_name = $1 AND user_id = $2 AND deleted_at IS NULL",
            self.table_ref()
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
             WHERE app_name = $1 AND user_id = $2 AND memory_id = $3",
            self.table_ref()
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
impl MemoryBackend for PostgresBackend {
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
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (app_name, user_id, memory_id) DO UPDATE SET
                 memory_data = EXCLUDED.memory_data,
                 updated_at = now(),
                 deleted_at = NULL",
            t = self.table_ref()
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
            "UPDATE {} SET memory_data = $1, updated_at = now()
             WHERE app_name = $2 AND user_id = $3 AND memory_id = $4 AND deleted_at IS NULL",
            self.table_ref()
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
                "UPDATE {} SET deleted_at = now()
                 WHERE app_name = $1 AND user_id = $2 AND memory_id = $3 AND deleted_at IS NULL",
                self.table_ref()
            )
        } else {
            format!(
                "DELETE FROM {} WHERE app_name = $1 AND user_id = $2 AND memory_id = $3",
                self.table_ref()
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
                "UPDATE {} SET deleted_at = now()
                 WHERE app_name = $1 AND user_id = $2 AND deleted_at IS NULL",
                self.table_ref()
            )
        } else {
            format!(
                "DELETE FROM {} WHERE app_name = $1 AND user_id = $2",
                self.table_ref()
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
             WHERE app_name = $1 AND user_id = $2 AND deleted_at IS NULL
             ORDER BY updated_at DESC, created_at DESC
             LIMIT $3",
            self.table_ref()
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
             WHERE app_name = $1 AND user_id = $2 AND deleted_at IS NULL",
            self.table_ref()
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

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Bad table and schema names are rejected before any connection is used.
    #[tokio::test]
    async fn invalid_identifiers_rejected_before_io() {
        // Lazy pool: no connection is established until a query runs, so
        // identifier validation must fire first.
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/heddle_never")
            .expect("lazy pool");
        let err = PostgresBackend::with_pool(
            pool.clone(),
            "bad-name".into(),
            None,
            BackendPolicy::default(),
            true,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidIdentifier(_)));

        let err = PostgresBackend::with_pool(
            pool,
            "memories".into(),
            Some("bad schema".into()),
            BackendPolicy::default(),
            true,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidIdentifier(_)));
    }
}
