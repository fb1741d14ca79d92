//! # Checkpointing: durable snapshots for graph executions
//!
//! A checkpoint saver stores snapshots plus their pending task writes, keyed
//! by `(lineage_id, namespace, checkpoint_id)`, and replays them across
//! process restarts with exactly-once semantics on the caller's side.
//!
//! | Type | Persistence | Atomic put_full | Notes |
//! |------|-------------|-----------------|-------|
//! | [`MemorySaver`] | In-memory | Single lock section | Dev, tests; optional per-lineage cap |
//! | [`RedisSaver`] | Redis | Pipelined MULTI/EXEC | TTL on every key (default 7 days) |

pub mod checkpoint;
pub mod memory_saver;
pub mod redis_saver;
pub mod saver;

pub use checkpoint::{
    sort_pending_writes, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSource,
    CheckpointTuple, PendingWrite,
};
pub use memory_saver::MemorySaver;
pub use redis_saver::{RedisSaver, DEFAULT_TTL};
pub use saver::{CheckpointError, CheckpointSaver, ListFilter};
