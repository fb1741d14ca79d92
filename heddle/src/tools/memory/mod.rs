//! Memory tools: the fixed tool names agents use to touch memory.
//!
//! `memory_add`, `memory_update`, `memory_search`, `memory_load`,
//! `memory_delete`, `memory_clear`. The facade decides which are exposed.

mod add;
mod clear;
mod delete;
mod load;
mod search;
mod update;

pub use add::{AddMemoryTool, TOOL_MEMORY_ADD};
pub use clear::{ClearMemoriesTool, TOOL_MEMORY_CLEAR};
pub use delete::{DeleteMemoryTool, TOOL_MEMORY_DELETE};
pub use load::{LoadMemoriesTool, TOOL_MEMORY_LOAD};
pub use search::{SearchMemoriesTool, TOOL_MEMORY_SEARCH};
pub use update::{UpdateMemoryTool, TOOL_MEMORY_UPDATE};

use crate::memory::entry::MemoryEntry;

/// JSON shape shared by search and load results.
pub(crate) fn entries_to_json(entries: &[MemoryEntry]) -> serde_json::Value {
    serde_json::json!({
        "memories": entries
            .iter()
            .map(|e| serde_json::json!({
                "memory_id": e.id,
                "memory": e.memory,
                "created_at": e.created_at,
                "updated_at": e.updated_at,
            }))
            .collect::<Vec<_>>()
    })
}

pub(crate) fn string_arg(args: &serde_json::Value, name: &str) -> Option<String> {
    args.get(name).and_then(|v| v.as_str()).map(String::from)
}

pub(crate) fn topics_arg(args: &serde_json::Value) -> Vec<String> {
    args.get("topics")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|t| t.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}
