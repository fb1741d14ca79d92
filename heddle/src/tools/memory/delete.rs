use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::memory::backend::MemoryBackend;
use crate::memory::entry::MemoryKey;
use crate::tools::r#trait::{require_user_key, Tool, ToolContext, ToolError, ToolSpec};

/// Tool name for the delete operation.
pub const TOOL_MEMORY_DELETE: &str = "memory_delete";

/// Deletes one memory by id.
///
/// **Interaction**: Off by default; exposed only when explicitly enabled in
/// agentic mode.
pub struct DeleteMemoryTool {
    backend: Arc<dyn MemoryBackend>,
}

impl DeleteMemoryTool {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for DeleteMemoryTool {
    fn name(&self) -> &str {
        TOOL_MEMORY_DELETE
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_MEMORY_DELETE.to_string(),
            description: Some(
                "Delete a stored memory by id when the user asks to forget it.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "memory_id": { "type": "string", "description": "Id of the memory to delete" }
                },
                "required": ["memory_id"]
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
        self.backend
            .delete(&MemoryKey::from_user(&key, memory_id))
            .await?;
        Ok(json!({ "message": "memory deleted" }))
    }
}
