//! Message shapes carried inside event choices: roles, content parts, tool calls.

use serde::{Deserialize, Serialize};

/// Author role of a message or delta.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    #[default]
    Assistant,
    /// Tool response messages; paired with [`EventMessage::tool_id`].
    Tool,
}

/// One requested function-style invocation from the model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON argument string, exactly as the model produced it.
    #[serde(default)]
    pub arguments: String,
}

/// A tool call attached to an assistant message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    /// Call kind; `"function"` for function-style calls.
    #[serde(rename = "type", default)]
    pub kind: String,
    pub function: FunctionCall,
}

/// Non-text message content: inline file bytes or a file reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    File {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// Inline bytes; mutually exclusive with `file_id`.
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Vec<u8>>,
        /// Reference (URI) to externally stored content.
        #[serde(skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
    },
}

/// Message payload of a choice: full content (`message`) or incremental content (`delta`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Structured content; empty for plain-text messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_parts: Vec<ContentPart>,
    /// For `Role::Tool`: id of the tool call this message responds to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_id: String,
    /// Name of the tool that produced a tool response, when known.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl EventMessage {
    /// Plain assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            ..Self::default()
        }
    }

    /// Plain user text message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            ..Self::default()
        }
    }

    /// Tool response message for the given call id.
    pub fn tool_response(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_id: tool_id.into(),
            tool_name: tool_name.into(),
            ..Self::default()
        }
    }
}

/// One alternative in a response. Streaming responses populate `delta`;
/// complete responses populate `message`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub message: EventMessage,
    #[serde(default)]
    pub delta: EventMessage,
}
