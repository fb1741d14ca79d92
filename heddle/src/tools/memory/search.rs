use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::memory::backend::MemoryBackend;
use crate::tools::r#trait::{require_user_key, Tool, ToolContext, ToolError, ToolSpec};

/// Tool name for the search operation.
pub const TOOL_MEMORY_SEARCH: &str = "memory_search";

/// Searches the user's memories by keyword.
///
/// **Interaction**: The one tool exposed in every mode; in auto mode it is
/// the agent's only way to reach memory besides an explicitly enabled load.
pub struct SearchMemoriesTool {
    backend: Arc<dyn MemoryBackend>,
}

impl SearchMemoriesTool {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for SearchMemoriesTool {
    fn name(&self) -> &str {
        TOOL_MEMORY_SEARCH
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_MEMORY_SEARCH.to_string(),
            description: Some(
                "Search stored memories by keyword. Call before answering questions that may \
                 depend on earlier conversations."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: Option<&ToolContext>,
    ) -> Result<serde_json::Value, ToolError> {
        let key = require_user_key(ctx)?;
        let query = super::string_arg(&args, "query")
            .ok_or_else(|| ToolError::InvalidInput("query is required".into()))?;
        let entries = self.backend.search(&key, &query).await?;
        Ok(super::entries_to_json(&entries))
    }
}
