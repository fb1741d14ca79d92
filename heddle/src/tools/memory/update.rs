use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::memory::backend::MemoryBackend;
use crate::memory::entry::MemoryKey;
use crate::tools::r#trait::{require_user_key, Tool, ToolContext, ToolError, ToolSpec};

/// Tool name for the update operation.
pub const TOOL_MEMORY_UPDATE: &str = "memory_update";

/// Replaces the content of an existing memory.
///
/// **Interaction**: Exposed in agentic mode (default-enabled); hidden in auto
/// mode.
pub struct UpdateMemoryTool {
    backend: Arc<dyn MemoryBackend>,
}

impl UpdateMemoryTool {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for UpdateMemoryTool {
    fn name(&self) -> &str {
        TOOL_MEMORY_UPDATE
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_MEMORY_UPDATE.to_string(),
            description: Some(
                "Update an existing memory by id when a stored fact changed or was corrected."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "memory_id": { "type": "string", "description": "Id of the memory to update" },
                    "memory": { "type": "string", "description": "The corrected fact" },
                    "topics": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Topic labels (optional)"
                    }
                },
                "required": ["memory_id", "memory"]
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: Option<&ToolContext>,
    ) -> Result<serde_json::Value, ToolError> {
        let key = require_user_key(ctx)?;
        let memory_id = super::string_arg(&args, "memory_id")
            .ok_or_else(|| ToolError::InvalidInput("memory_id is required".into()))?;
        let text = super::string_arg(&args, "memory")
            .ok_or_else(|| ToolError::InvalidInput("memory is required".into()))?;
        let entry = self
            .backend
            .update(
                &MemoryKey::from_user(&key, memory_id),
                text,
                super::topics_arg(&args),
            )
            .await?;
        Ok(json!({ "memory_id": entry.id, "message": "memory updated" }))
    }
}
