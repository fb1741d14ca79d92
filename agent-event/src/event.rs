//! Event and response shapes: one event per agent-stream increment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{Choice, EventMessage, ToolCall};

/// Response `object` value for code-execution events.
pub const OBJECT_CODE_EXECUTION: &str = "code_execution";

/// Event tag marking executable code produced by the model.
pub const TAG_CODE_EXECUTION: &str = "code_execution";
/// Event tag marking the result of executing model-produced code.
pub const TAG_CODE_EXECUTION_RESULT: &str = "code_execution_result";

/// Error attached to a response when the upstream model call failed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    #[serde(default)]
    pub code: String,
    pub message: String,
}

/// Model response carried by an event: choices plus completion state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    /// Response object type (e.g. `chat.completion.chunk`, [`OBJECT_CODE_EXECUTION`]).
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// True on the final event of a turn.
    #[serde(default)]
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// One agent stream event: who produced it, which invocation it belongs to,
/// and the response increment it carries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub invocation_id: String,
    /// Producing agent name (author of the content).
    pub author: String,
    pub timestamp: DateTime<Utc>,
    /// Optional tag marking specialized events (see [`TAG_CODE_EXECUTION`]).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub response: Response,
}

impl Event {
    /// New event with an empty response, stamped now.
    pub fn new(
        id: impl Into<String>,
        invocation_id: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            invocation_id: invocation_id.into(),
            author: author.into(),
            timestamp: Utc::now(),
            tag: None,
            response: Response::default(),
        }
    }

    /// Complete assistant text event.
    pub fn assistant_text(
        id: impl Into<String>,
        invocation_id: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(id, invocation_id, author);
        event.response.choices.push(Choice {
            message: EventMessage::assistant(content),
            ..Choice::default()
        });
        event
    }

    /// Streaming delta event; `done` marks the final chunk.
    pub fn delta(
        id: impl Into<String>,
        invocation_id: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
        done: bool,
    ) -> Self {
        let mut event = Self::new(id, invocation_id, author);
        event.response.done = done;
        event.response.choices.push(Choice {
            delta: EventMessage {
                content: content.into(),
                ..EventMessage::default()
            },
            ..Choice::default()
        });
        event
    }

    /// Assistant event requesting the given tool calls.
    pub fn tool_calls(
        id: impl Into<String>,
        invocation_id: impl Into<String>,
        author: impl Into<String>,
        calls: Vec<ToolCall>,
    ) -> Self {
        let mut event = Self::new(id, invocation_id, author);
        event.response.choices.push(Choice {
            message: EventMessage {
                tool_calls: calls,
                ..EventMessage::default()
            },
            ..Choice::default()
        });
        event
    }

    /// True when any choice carries a tool call or a tool response.
    pub fn has_tool_content(&self) -> bool {
        self.response.choices.iter().any(|choice| {
            !choice.message.tool_calls.is_empty()
                || choice.message.role == crate::message::Role::Tool
                || !choice.message.tool_id.is_empty()
        })
    }
}
