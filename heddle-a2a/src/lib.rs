//! # Heddle A2A bridge
//!
//! Bidirectional translator between the agent's internal event stream
//! (incremental deltas, tool calls, tool responses, code execution) and the
//! A2A protocol surface (messages, tasks, artifacts, state transitions,
//! streaming subscriptions).
//!
//! Wire framing (JSON-RPC, HTTP) is the serving library's job; this crate
//! stops at the semantic layer:
//!
//! - [`types`]: A2A message/part/task/artifact shapes.
//! - [`convert`]: event ↔ protocol translation ([`A2aConverter`]).
//! - [`tunnel`]: the producer-consumer batch coalescer ([`run_tunnel`]).
//! - [`processor`]: unary and streaming task orchestration
//!   ([`A2aProcessor`]) over an [`AgentRunner`].

pub mod convert;
pub mod processor;
pub mod runner;
pub mod tunnel;
pub mod types;

pub use convert::{A2aConverter, ConvertError};
pub use processor::{A2aProcessor, AuthContext, ProcessorConfig, ProcessorError};
pub use runner::{AgentRunner, MockRunner, RunInvocation, RunnerError};
pub use tunnel::{run_tunnel, TunnelError};
pub use types::{
    A2aMessage, A2aRole, A2aStreamEvent, Artifact, FileContent, Part, Task,
    TaskArtifactUpdateEvent, TaskState, TaskStatus, TaskStatusUpdateEvent,
};
