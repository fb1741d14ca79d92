//! Memory service facade: backend construction, tool-surface selection, and
//! worker-pool lifecycle.
//!
//! Two modes. Agentic (no extractor): the agent mutates memory through the
//! enabled tools; add/update/search/load are on by default, delete/clear off
//! unless explicitly enabled. Auto (extractor configured): extraction
//! performs the writes, so the agent sees read-side tools only: search
//! always, load when explicitly enabled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::memory::backend::MemoryBackend;
use crate::memory::entry::{MemoryEntry, MemoryKey, UserKey};
use crate::memory::in_memory::InMemoryBackend;
use crate::memory::mysql::MySqlBackend;
use crate::memory::options::MemoryOptions;
use crate::memory::postgres::PostgresBackend;
use crate::memory::redis_store::RedisBackend;
use crate::memory::registry;
use crate::memory::service::{MemoryError, MemoryService};
use crate::memory::vector::VectorBackend;
use crate::memory::worker::{AutoMemoryPool, MemoryJob};
use crate::memory::Embedder;
use crate::tools::{
    AddMemoryTool, ClearMemoriesTool, DeleteMemoryTool, LoadMemoriesTool, SearchMemoriesTool,
    Tool, UpdateMemoryTool, TOOL_MEMORY_ADD, TOOL_MEMORY_CLEAR, TOOL_MEMORY_DELETE,
    TOOL_MEMORY_LOAD, TOOL_MEMORY_SEARCH, TOOL_MEMORY_UPDATE,
};

/// Fixed tool order used when composing the exposed list.
const TOOL_ORDER: [&str; 6] = [
    TOOL_MEMORY_ADD,
    TOOL_MEMORY_UPDATE,
    TOOL_MEMORY_SEARCH,
    TOOL_MEMORY_LOAD,
    TOOL_MEMORY_DELETE,
    TOOL_MEMORY_CLEAR,
];

fn default_enabled(name: &str) -> bool {
    matches!(
        name,
        TOOL_MEMORY_ADD | TOOL_MEMORY_UPDATE | TOOL_MEMORY_SEARCH | TOOL_MEMORY_LOAD
    )
}

/// The memory service handed to the agent layer.
///
/// **Interaction**: Constructed per backend through the `in_memory` /
/// `mysql` / `postgres` / `redis` / `vector` constructors; held as
/// `Arc<dyn MemoryService>`. The tool list is frozen at construction and
/// cloned on every [`MemoryService::tools`] call.
pub struct MemoryFacade {
    backend: Arc<dyn MemoryBackend>,
    pool: Option<Arc<AutoMemoryPool>>,
    tools: Vec<Arc<dyn Tool>>,
    closed: AtomicBool,
}

impl MemoryFacade {
    /// Wraps an already-built backend. Starts the worker pool iff an
    /// extractor is configured; precomputes the tool list.
    pub fn with_backend(
        backend: Arc<dyn MemoryBackend>,
        options: MemoryOptions,
    ) -> Result<Self, MemoryError> {
        let exposed = Self::exposed_tool_names(&options);
        let tools = Self::build_tools(&backend, &options, &exposed);

        let pool = match options.extractor {
            Some(ref extractor) => {
                extractor.set_enabled_tools(exposed.iter().map(|s| s.to_string()).collect());
                let pool = Arc::new(AutoMemoryPool::new(
                    Arc::clone(&backend),
                    Arc::clone(extractor),
                    options.worker_config(),
                ));
                pool.start();
                Some(pool)
            }
            None => None,
        };

        Ok(Self {
            backend,
            pool,
            tools,
            closed: AtomicBool::new(false),
        })
    }

    /// In-process backend; the default when nothing is configured.
    pub fn in_memory(options: MemoryOptions) -> Result<Self, MemoryError> {
        let backend = Arc::new(InMemoryBackend::new(options.policy()));
        Self::with_backend(backend, options)
    }

    /// MySQL backend. Connection priority: DSN > host/port options > named
    /// instance registry; fails when none is configured.
    pub async fn mysql(options: MemoryOptions) -> Result<Self, MemoryError> {
        let policy = options.policy();
        let backend: Arc<dyn MemoryBackend> = if let Some(dsn) = options.mysql_dsn() {
            Arc::new(
                MySqlBackend::connect(
                    &dsn,
                    options.table_name.clone(),
                    policy,
                    options.skip_db_init,
                )
                .await?,
            )
        } else if let Some(pool) = options
            .instance_name
            .as_deref()
            .and_then(registry::mysql_instance)
        {
            Arc::new(
                MySqlBackend::with_pool(
                    pool,
                    options.table_name.clone(),
                    policy,
                    options.skip_db_init,
                )
                .await?,
            )
        } else {
            return Err(MemoryError::Storage(
                "mysql: no dsn, host, or registered instance configured".into(),
            ));
        };
        Self::with_backend(backend, options)
    }

    /// Postgres backend, same connection priority as MySQL.
    pub async fn postgres(options: MemoryOptions) -> Result<Self, MemoryError> {
        let policy = options.policy();
        let backend: Arc<dyn MemoryBackend> = if let Some(dsn) = options.postgres_dsn() {
            Arc::new(
                PostgresBackend::connect(
                    &dsn,
                    options.table_name.clone(),
                    options.schema_name.clone(),
                    policy,
                    options.skip_db_init,
                )
                .await?,
            )
        } else if let Some(pool) = options
            .instance_name
            .as_deref()
            .and_then(registry::postgres_instance)
        {
            Arc::new(
                PostgresBackend::with_pool(
                    pool,
                    options.table_name.clone(),
                    options.schema_name.clone(),
                    policy,
                    options.skip_db_init,
                )
                .await?,
            )
        } else {
            return Err(MemoryError::Storage(
                "postgres: no dsn, host, or registered instance configured".into(),
            ));
        };
        Self::with_backend(backend, options)
    }

    /// Redis backend. URL priority: DSN > host/port > named instance >
    /// `redis://127.0.0.1:6379`.
    pub async fn redis(options: MemoryOptions) -> Result<Self, MemoryError> {
        let policy = options.policy();
        let backend: Arc<dyn MemoryBackend> = if let Some(url) = options.redis_url() {
            Arc::new(RedisBackend::connect(&url, policy).await?)
        } else if let Some(connection) = options
            .instance_name
            .as_deref()
            .and_then(registry::redis_instance)
        {
            Arc::new(RedisBackend::with_connection(connection, policy))
        } else {
            Arc::new(RedisBackend::connect("redis://127.0.0.1:6379", policy).await?)
        };
        Self::with_backend(backend, options)
    }

    /// Vector backend over the given embedder.
    pub fn vector(
        options: MemoryOptions,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, MemoryError> {
        let backend = Arc::new(VectorBackend::new(embedder, options.policy()));
        Self::with_backend(backend, options)
    }

    /// Tool names exposed for these options, in fixed order.
    fn exposed_tool_names(options: &MemoryOptions) -> Vec<&'static str> {
        let auto_mode = options.extractor.is_some();
        TOOL_ORDER
            .iter()
            .copied()
            .filter(|name| {
                if auto_mode {
                    match *name {
                        TOOL_MEMORY_SEARCH => true,
                        TOOL_MEMORY_LOAD => {
                            options.enabled_tools.get(TOOL_MEMORY_LOAD).copied() == Some(true)
                        }
                        _ => false,
                    }
                } else {
                    options
                        .enabled_tools
                        .get(*name)
                        .copied()
                        .unwrap_or_else(|| default_enabled(name))
                }
            })
            .collect()
    }

    fn build_tools(
        backend: &Arc<dyn MemoryBackend>,
        options: &MemoryOptions,
        exposed: &[&'static str],
    ) -> Vec<Arc<dyn Tool>> {
        exposed
            .iter()
            .map(|name| {
                if let Some(creator) = options.custom_tools.get(*name) {
                    return creator(Arc::clone(backend));
                }
                match *name {
                    TOOL_MEMORY_ADD => {
                        Arc::new(AddMemoryTool::new(Arc::clone(backend))) as Arc<dyn Tool>
                    }
                    TOOL_MEMORY_UPDATE => Arc::new(UpdateMemoryTool::new(Arc::clone(backend))),
                    TOOL_MEMORY_SEARCH => Arc::new(SearchMemoriesTool::new(Arc::clone(backend))),
                    TOOL_MEMORY_LOAD => Arc::new(LoadMemoriesTool::new(Arc::clone(backend))),
                    TOOL_MEMORY_DELETE => Arc::new(DeleteMemoryTool::new(Arc::clone(backend))),
                    _ => Arc::new(ClearMemoriesTool::new(Arc::clone(backend))),
                }
            })
            .collect()
    }
}

#[async_trait]
impl MemoryService for MemoryFacade {
    async fn add_memory(
        &self,
        key: &UserKey,
        text: String,
        topics: Vec<String>,
    ) -> Result<MemoryEntry, MemoryError> {
        self.backend.add(key, text, topics).await
    }

    async fn update_memory(
        &self,
        key: &MemoryKey,
        text: String,
        topics: Vec<String>,
    ) -> Result<MemoryEntry, MemoryError> {
        self.backend.update(key, text, topics).await
    }

    async fn delete_memory(&self, key: &MemoryKey) -> Result<(), MemoryError> {
        self.backend.delete(key).await
    }

    async fn clear_memories(&self, key: &UserKey) -> Result<(), MemoryError> {
        self.backend.clear(key).await
    }

    async fn read_memories(
        &self,
        key: &UserKey,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        self.backend.read(key, limit).await
    }

    async fn search_memories(
        &self,
        key: &UserKey,
        query: &str,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        self.backend.search(key, query).await
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.clone()
    }

    async fn enqueue_auto_memory_job(&self, job: MemoryJob) -> Result<(), MemoryError> {
        match self.pool {
            Some(ref pool) => pool.enqueue(job).await,
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), MemoryError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(ref pool) = self.pool {
            pool.stop().await;
        }
        self.backend.close().await
    }
}
