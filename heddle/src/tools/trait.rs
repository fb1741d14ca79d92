use async_trait::async_trait;
use serde_json::Value;

use crate::memory::entry::UserKey;
use crate::memory::service::MemoryError;

/// Error type for tool calls.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("execution: {0}")]
    Execution(String),
}

impl From<MemoryError> for ToolError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::InvalidKey(s) | MemoryError::InvalidIdentifier(s) => {
                ToolError::InvalidInput(s)
            }
            MemoryError::NotFound(s) => ToolError::NotFound(s),
            other => ToolError::Execution(other.to_string()),
        }
    }
}

/// Per-call context: which user's memory space the tool operates on.
///
/// Filled by the serving layer from the session, not by the model.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub user_key: UserKey,
}

impl ToolContext {
    pub fn new(user_key: UserKey) -> Self {
        Self { user_key }
    }
}

/// Specification of one tool: name, description for the model, and the JSON
/// schema of its arguments.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// One tool callable by the model.
///
/// **Interaction**: The memory facade precomputes `Vec<Arc<dyn Tool>>` at
/// construction; `MemoryService::tools` clones that list on every call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (e.g. `memory_search`).
    fn name(&self) -> &str;

    /// Spec used to build prompts and validate arguments.
    fn spec(&self) -> ToolSpec;

    /// Executes the tool. `ctx` carries the caller's user key; tools fail
    /// with invalid input when it is absent.
    async fn call(&self, args: Value, ctx: Option<&ToolContext>) -> Result<Value, ToolError>;
}

pub(crate) fn require_user_key(ctx: Option<&ToolContext>) -> Result<UserKey, ToolError> {
    let key = ctx
        .map(|c| c.user_key.clone())
        .ok_or_else(|| ToolError::InvalidInput("tool context with user key required".into()))?;
    key.validate()?;
    Ok(key)
}
