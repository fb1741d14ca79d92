use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::memory::backend::MemoryBackend;
use crate::tools::r#trait::{require_user_key, Tool, ToolContext, ToolError, ToolSpec};

/// Tool name for the clear operation.
pub const TOOL_MEMORY_CLEAR: &str = "memory_clear";

/// Deletes every memory for the calling user.
///
/// **Interaction**: Off by default; exposed only when explicitly enabled in
/// agentic mode.
pub struct ClearMemoriesTool {
    backend: Arc<dyn MemoryBackend>,
}

impl ClearMemoriesTool {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for ClearMemoriesTool {
    fn name(&self) -> &str {
        TOOL_MEMORY_CLEAR
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_MEMORY_CLEAR.to_string(),
            description: Some(
                "Delete all stored memories for the user. Only call on an explicit request."
                    .to_string(),
            ),
            input_schema: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn call(
        &self,
        _args: serde_json::Value,
        ctx: Option<&ToolContext>,
    ) -> Result<serde_json::Value, ToolError> {
        let key = require_user_key(ctx)?;
        self.backend.clear(&key).await?;
        Ok(json!({ "message": "memories cleared" }))
    }
}
