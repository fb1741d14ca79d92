//! Tool surface exposed to agents.
//!
//! Each tool has a unique name, a JSON-schema spec, and async call logic.
//! Which memory tools are exposed is decided once at service construction
//! (see the memory facade): agentic mode exposes the enabled read/write set,
//! auto mode exposes read-side tools only.

pub mod memory;

mod r#trait;

pub use r#trait::{Tool, ToolContext, ToolError, ToolSpec};

pub use memory::{
    AddMemoryTool, ClearMemoriesTool, DeleteMemoryTool, LoadMemoriesTool, SearchMemoriesTool,
    UpdateMemoryTool, TOOL_MEMORY_ADD, TOOL_MEMORY_CLEAR, TOOL_MEMORY_DELETE, TOOL_MEMORY_LOAD,
    TOOL_MEMORY_SEARCH, TOOL_MEMORY_UPDATE,
};
