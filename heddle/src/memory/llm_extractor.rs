//! Chat-model implementation of [`MemoryExtractor`].
//!
//! Prompts an OpenAI-compatible chat model with the turn's messages and the
//! user's existing memories, and parses a JSON list of add/update/delete
//! operations from the reply. Requires `OPENAI_API_KEY` unless a custom
//! config is supplied.

use std::sync::RwLock;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde::Deserialize;

use agent_event::{EventMessage, Role};

use crate::memory::entry::MemoryEntry;
use crate::memory::extractor::{ExtractorMetadata, MemoryExtractor, MemoryOperation};
use crate::memory::service::MemoryError;

const DEFAULT_MODEL: &str = "gpt-4o-mini";

const DEFAULT_PROMPT: &str = "You extract durable facts about the user from a conversation. \
Respond with a JSON array of operations and nothing else. Each operation is one of:\n\
  {\"action\": \"add\", \"memory\": \"<fact>\", \"topics\": [\"<topic>\", ...]}\n\
  {\"action\": \"update\", \"memory_id\": \"<id>\", \"memory\": \"<fact>\", \"topics\": [...]}\n\
  {\"action\": \"delete\", \"memory_id\": \"<id>\"}\n\
Only record stable, atomic facts. Prefer updating an existing memory over \
adding a near-duplicate. Return [] when there is nothing worth keeping.";

/// Raw operation shape the model replies with; unknown actions are skipped.
#[derive(Debug, Deserialize)]
struct RawOperation {
    action: String,
    #[serde(default)]
    memory_id: Option<String>,
    #[serde(default)]
    memory: Option<String>,
    #[serde(default)]
    topics: Option<Vec<String>>,
}

/// LLM-backed extractor.
///
/// **Interaction**: Configured through the memory options; its presence puts
/// the service in auto mode. The facade calls `set_enabled_tools` with the
/// tool names still exposed to the agent so the prompt can mention them.
pub struct LlmExtractor {
    client: Client<OpenAIConfig>,
    model: RwLock<String>,
    prompt: RwLock<String>,
    enabled_tools: RwLock<Vec<String>>,
}

impl LlmExtractor {
    /// New extractor with the default model; key from `OPENAI_API_KEY`.
    pub fn new() -> Self {
        Self::with_config(OpenAIConfig::new(), DEFAULT_MODEL)
    }

    /// New extractor with custom config (key, base URL) and model.
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: RwLock::new(model.into()),
            prompt: RwLock::new(DEFAULT_PROMPT.to_string()),
            enabled_tools: RwLock::new(Vec::new()),
        }
    }

    fn system_prompt(&self, existing: &[MemoryEntry]) -> String {
        let mut prompt = self
            .prompt
            .read()
            .map(|p| p.clone())
            .unwrap_or_else(|_| DEFAULT_PROMPT.to_string());
        if let Ok(tools) = self.enabled_tools.read() {
            if !tools.is_empty() {
                prompt.push_str(&format!(
                    "\n\nThe agent can still call these memory tools itself: {}.",
                    tools.join(", ")
                ));
            }
        }
        if existing.is_empty() {
            prompt.push_str("\n\nThe user has no stored memories yet.");
        } else {
            prompt.push_str("\n\nExisting memories (id: text [topics]):\n");
            for entry in existing {
                prompt.push_str(&format!(
                    "{}: {} [{}]\n",
                    entry.id,
                    entry.memory.text,
                    entry.memory.topics.join(", ")
                ));
            }
        }
        prompt
    }

    fn conversation_text(messages: &[EventMessage]) -> String {
        let mut text = String::new();
        for message in messages {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            if !message.content.is_empty() {
                text.push_str(&format!("{}: {}\n", role, message.content));
            }
        }
        text
    }

    /// Parses the model reply into operations, skipping unknown kinds and
    /// entries missing required fields.
    fn parse_operations(content: &str) -> Result<Vec<MemoryOperation>, MemoryError> {
        let json = extract_json_array(content).unwrap_or(content);
        let raw: Vec<RawOperation> = serde_json::from_str(json)
            .map_err(|e| MemoryError::Upstream(format!("extractor reply parse: {}", e)))?;

        let mut operations = Vec::with_capacity(raw.len());
        for op in raw {
            match op.action.as_str() {
                "add" => {
                    let Some(memory) = op.memory else {
                        tracing::warn!("extractor add op without memory text, skipping");
                        continue;
                    };
                    operations.push(MemoryOperation::Add {
                        text: memory,
                        topics: op.topics.unwrap_or_default(),
                    });
                }
                "update" => {
                    let (Some(memory_id), Some(memory)) = (op.memory_id, op.memory) else {
                        tracing::warn!("extractor update op missing id or text, skipping");
                        continue;
                    };
                    operations.push(MemoryOperation::Update {
                        memory_id,
                        text: memory,
                        topics: op.topics.unwrap_or_default(),
                    });
                }
                "delete" => {
                    let Some(memory_id) = op.memory_id else {
                        tracing::warn!("extractor delete op without id, skipping");
                        continue;
                    };
                    operations.push(MemoryOperation::Delete { memory_id });
                }
                other => {
                    tracing::warn!("unknown extractor operation kind {:?}, skipping", other);
                }
            }
        }
        Ok(operations)
    }
}

impl Default for LlmExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Cuts the first top-level JSON array out of a reply that may wrap it in
/// prose or a code fence.
fn extract_json_array(content: &str) -> Option<&str> {
    let start = content.find('[')?;
    let end = content.rfind(']')?;
    (end > start).then(|| &content[start..=end])
}

#[async_trait]
impl MemoryExtractor for LlmExtractor {
    async fn extract(
        &self,
        messages: &[EventMessage],
        existing: &[MemoryEntry],
    ) -> Result<Vec<MemoryOperation>, MemoryError> {
        let system = self.system_prompt(existing);
        let conversation = Self::conversation_text(messages);
        let model = self
            .model
            .read()
            .map(|m| m.clone())
            .unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let request_messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage::from(
                system.as_str(),
            )),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage::from(
                conversation.as_str(),
            )),
        ];
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(request_messages)
            .build()
            .map_err(|e| MemoryError::Upstream(format!("extractor request build: {}", e)))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| MemoryError::Upstream(format!("extractor api: {}", e)))?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Self::parse_operations(&content)
    }

    fn set_prompt(&self, prompt: String) {
        if let Ok(mut guard) = self.prompt.write() {
            *guard = prompt;
        }
    }

    fn set_model(&self, model: String) {
        if let Ok(mut guard) = self.model.write() {
            *guard = model;
        }
    }

    fn set_enabled_tools(&self, tools: Vec<String>) {
        if let Ok(mut guard) = self.enabled_tools.write() {
            *guard = tools;
        }
    }

    fn metadata(&self) -> ExtractorMetadata {
        ExtractorMetadata {
            name: "llm".into(),
            model: self
                .model
                .read()
                .map(|m| m.clone())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: A well-formed reply parses into the three operation kinds.
    #[test]
    fn parse_all_operation_kinds() {
        let reply = r#"[
            {"action": "add", "memory": "User works at Example Corp", "topics": ["work"]},
            {"action": "update", "memory_id": "abc", "memory": "User prefers tea", "topics": ["food"]},
            {"action": "delete", "memory_id": "def"}
        ]"#;
        let ops = LlmExtractor::parse_operations(reply).unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(
            ops[0],
            MemoryOperation::Add {
                text: "User works at Example Corp".into(),
                topics: vec!["work".into()],
            }
        );
        assert!(matches!(ops[2], MemoryOperation::Delete { .. }));
    }

    /// **Scenario**: Unknown operation kinds are skipped, not fatal.
    #[test]
    fn parse_skips_unknown_kinds() {
        let reply = r#"[
            {"action": "merge", "memory_id": "abc"},
            {"action": "add", "memory": "kept"}
        ]"#;
        let ops = LlmExtractor::parse_operations(reply).unwrap();
        assert_eq!(ops.len(), 1);
    }

    /// **Scenario**: A reply wrapped in a code fence still parses.
    #[test]
    fn parse_handles_fenced_reply() {
        let reply = "```json\n[{\"action\": \"add\", \"memory\": \"x\"}]\n```";
        let ops = LlmExtractor::parse_operations(reply).unwrap();
        assert_eq!(ops.len(), 1);
    }

    /// **Scenario**: Garbage replies surface an upstream error.
    #[test]
    fn parse_garbage_is_upstream_error() {
        let err = LlmExtractor::parse_operations("no json here").unwrap_err();
        assert!(matches!(err, MemoryError::Upstream(_)));
    }

    /// **Scenario**: System prompt lists existing memories and exposed tools.
    #[test]
    fn system_prompt_includes_context() {
        use crate::memory::entry::{Memory, UserKey};
        let extractor = LlmExtractor::with_config(OpenAIConfig::new(), "test-model");
        extractor.set_enabled_tools(vec!["memory_search".into()]);
        let entry = crate::memory::entry::MemoryEntry::new(
            &UserKey::new("a", "u"),
            Memory::new("likes tea", vec!["food".into()]),
        );
        let prompt = extractor.system_prompt(&[entry.clone()]);
        assert!(prompt.contains("memory_search"));
        assert!(prompt.contains(&entry.id));
        assert!(prompt.contains("likes tea"));
    }
}
