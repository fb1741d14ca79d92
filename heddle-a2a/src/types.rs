//! A2A wire shapes: messages, parts, tasks, artifacts, and status events.
//!
//! Only the semantic layer lives here; JSON-RPC framing and HTTP transport
//! are the serving library's job. Each variant maps to a JSON object with a
//! `kind` discriminator, matching the A2A data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message author on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum A2aRole {
    User,
    #[default]
    Agent,
}

/// File payload: inline base64 bytes or a URI reference, never both.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Base64-encoded inline bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// One content part of a message or artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
    },
    File {
        file: FileContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
    },
    Data {
        data: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text {
            text: text.into(),
            metadata: None,
        }
    }

    pub fn data(data: Value, metadata: Option<Map<String, Value>>) -> Self {
        Part::Data { data, metadata }
    }
}

/// A protocol message: an ordered list of parts plus routing ids.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct A2aMessage {
    pub message_id: String,
    pub role: A2aRole,
    #[serde(default)]
    pub parts: Vec<Part>,
    /// Conversation thread id; required on incoming messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl A2aMessage {
    /// New agent-role message with a fresh id.
    pub fn agent(parts: Vec<Part>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            role: A2aRole::Agent,
            parts,
            ..Self::default()
        }
    }

    /// New user-role message with one text part.
    pub fn user_text(context_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            role: A2aRole::User,
            parts: vec![Part::text(text)],
            context_id: Some(context_id.into()),
            ..Self::default()
        }
    }

    /// First text part, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            Part::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

/// Task lifecycle: `submitted → working → (completed | failed | canceled)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    #[default]
    Submitted,
    Working,
    Completed,
    Failed,
    Canceled,
}

/// Current task status, optionally carrying a message (e.g. failure detail).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<A2aMessage>,
    pub timestamp: DateTime<Utc>,
}

impl TaskStatus {
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            message: None,
            timestamp: Utc::now(),
        }
    }
}

/// A named, versioned payload attached to a streaming task; content arrives
/// as artifact-update deltas.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One streaming task.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub context_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<A2aMessage>,
}

/// Artifact content frame on a streaming subscription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskArtifactUpdateEvent {
    pub task_id: String,
    pub context_id: String,
    pub artifact: Artifact,
    #[serde(default)]
    pub last_chunk: bool,
}

/// State transition frame on a streaming subscription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusUpdateEvent {
    pub task_id: String,
    pub context_id: String,
    pub status: TaskStatus,
    /// True on the terminating transition of the task.
    #[serde(rename = "final")]
    pub is_final: bool,
}

/// What a streaming subscriber receives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum A2aStreamEvent {
    ArtifactUpdate(TaskArtifactUpdateEvent),
    StatusUpdate(TaskStatusUpdateEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Parts serialize with a `kind` discriminator.
    #[test]
    fn part_kind_discriminator() {
        let value = serde_json::to_value(Part::text("hi")).unwrap();
        assert_eq!(value["kind"], "text");
        let data = serde_json::to_value(Part::data(serde_json::json!({"a": 1}), None)).unwrap();
        assert_eq!(data["kind"], "data");
    }

    /// **Scenario**: Task states use kebab-case wire names.
    #[test]
    fn task_state_wire_names() {
        assert_eq!(
            serde_json::to_string(&TaskState::Submitted).unwrap(),
            "\"submitted\""
        );
        assert_eq!(
            serde_json::to_string(&TaskState::Canceled).unwrap(),
            "\"canceled\""
        );
    }

    /// **Scenario**: The final flag serializes under the wire name `final`.
    #[test]
    fn status_update_final_key() {
        let event = TaskStatusUpdateEvent {
            task_id: "t".into(),
            context_id: "c".into(),
            status: TaskStatus::new(TaskState::Completed),
            is_final: true,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["final"], true);
    }

    /// **Scenario**: first_text skips non-text parts.
    #[test]
    fn first_text_skips_non_text() {
        let message = A2aMessage {
            parts: vec![
                Part::data(serde_json::json!({}), None),
                Part::text("prompt"),
            ],
            ..A2aMessage::default()
        };
        assert_eq!(message.first_text(), Some("prompt"));
    }
}
