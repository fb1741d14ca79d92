//! Agent event model: one stream event per LLM increment, tool call, or tool response.
//!
//! This crate defines the wire shape of agent events and nothing else. It does not
//! depend on heddle; heddle and heddle-a2a consume these shapes to drive memory
//! extraction and protocol translation.

pub mod event;
pub mod message;

pub use event::{Event, Response, ResponseError, OBJECT_CODE_EXECUTION};
pub use event::{TAG_CODE_EXECUTION, TAG_CODE_EXECUTION_RESULT};
pub use message::{Choice, ContentPart, EventMessage, FunctionCall, Role, ToolCall};
