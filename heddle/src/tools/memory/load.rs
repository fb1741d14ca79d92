use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::memory::backend::MemoryBackend;
use crate::tools::r#trait::{require_user_key, Tool, ToolContext, ToolError, ToolSpec};

/// Tool name for the load operation.
pub const TOOL_MEMORY_LOAD: &str = "memory_load";

/// Loads the user's most recent memories without a query.
///
/// **Interaction**: Default-enabled in agentic mode; in auto mode exposed
/// only when explicitly enabled.
pub struct LoadMemoriesTool {
    backend: Arc<dyn MemoryBackend>,
}

impl LoadMemoriesTool {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for LoadMemoriesTool {
    fn name(&self) -> &str {
        TOOL_MEMORY_LOAD
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_MEMORY_LOAD.to_string(),
            description: Some(
                "Load the most recently updated memories for the user (no query needed)."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "description": "Max results (optional)" }
                }
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: Option<&ToolContext>,
    ) -> Result<serde_json::Value, ToolError> {
        let key = require_user_key(ctx)?;
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(0);
        let entries = self.backend.read(&key, limit).await?;
        Ok(super::entries_to_json(&entries))
    }
}
