use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::memory::backend::MemoryBackend;
use crate::tools::r#trait::{require_user_key, Tool, ToolContext, ToolError, ToolSpec};

/// Tool name for the add operation.
pub const TOOL_MEMORY_ADD: &str = "memory_add";

/// Stores a new memory for the calling user.
///
/// **Interaction**: Exposed in agentic mode (default-enabled); hidden in auto
/// mode because the extractor performs writes.
pub struct AddMemoryTool {
    backend: Arc<dyn MemoryBackend>,
}

impl AddMemoryTool {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for AddMemoryTool {
    fn name(&self) -> &str {
        TOOL_MEMORY_ADD
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_MEMORY_ADD.to_string(),
            description: Some(
                "Store a new memory about the user. Call when the user shares a fact worth \
                 remembering across sessions."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "memory": { "type": "string", "description": "The fact to remember" },
                    "topics": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Topic labels (optional)"
                    }
                },
                "required": ["memory"]
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: Option<&ToolContext>,
    ) -> Result<serde_json::Value, ToolError> {
        let key = require_user_key(ctx)?;
        let text = super::string_arg(&args, "memory")
            .ok_or_else(|| ToolError::InvalidInput("memory is required".into()))?;
        let entry = self
            .backend
            .add(&key, text, super::topics_arg(&args))
            .await?;
        Ok(json!({ "memory_id": entry.id, "message": "memory added" }))
    }
}
