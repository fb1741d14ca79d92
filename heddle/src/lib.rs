//! # Heddle
//!
//! Runtime core for conversational agents: a back-pressured memory
//! extraction and storage engine, and a versioned checkpoint store for
//! graph-structured workflows. The A2A protocol bridge lives in the sibling
//! `heddle-a2a` crate; agent event shapes in `agent-event`.
//!
//! ## Design principles
//!
//! - **Capability traits at the seams**: storage ([`MemoryBackend`],
//!   [`CheckpointSaver`]), model collaborators ([`MemoryExtractor`],
//!   [`Embedder`]), and the agent-facing service ([`MemoryService`]) are all
//!   trait objects; backends are a sum over implementations, not a hierarchy.
//! - **Background work never loses facts**: a full extraction queue means
//!   synchronous extraction on the caller, not a dropped job.
//! - **Validation before I/O**: keys and SQL identifiers are checked at every
//!   public entry point before storage is touched.
//!
//! ## Main modules
//!
//! - [`memory`]: entries and ids, keyword matcher, backends (in-process,
//!   MySQL, Postgres, Redis, vector), worker pool, service facade.
//! - [`checkpoint`]: checkpoint model and savers (in-memory, Redis).
//! - [`tools`]: the `memory_*` tool surface exposed to agents.
//!
//! Key types are re-exported at the crate root:
//! `use heddle::{MemoryFacade, MemoryOptions, MemorySaver};`

pub mod checkpoint;
pub mod memory;
pub mod tools;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointError, CheckpointMetadata, CheckpointSaver,
    CheckpointSource, CheckpointTuple, ListFilter, MemorySaver, PendingWrite, RedisSaver,
};
pub use memory::{
    AutoMemoryPool, Embedder, InMemoryBackend, LlmExtractor, Memory, MemoryBackend, MemoryEntry,
    MemoryError, MemoryFacade, MemoryJob, MemoryKey, MemoryOptions, MemoryService, MySqlBackend,
    OpenAiEmbedder, PostgresBackend, RedisBackend, UserKey, VectorBackend,
};
pub use tools::{Tool, ToolContext, ToolError, ToolSpec};
