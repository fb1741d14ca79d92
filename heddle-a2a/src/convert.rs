//! Event ↔ protocol translation.
//!
//! Incoming protocol messages become agent event-messages; outgoing agent
//! events become protocol messages (unary) or artifact updates (streaming).
//! Part handling is generic over `Borrow<Part>` so owned and borrowed parts
//! convert identically.

use std::borrow::Borrow;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value};

use agent_event::{
    ContentPart, Event, EventMessage, Role, OBJECT_CODE_EXECUTION, TAG_CODE_EXECUTION,
    TAG_CODE_EXECUTION_RESULT,
};

use crate::types::{A2aMessage, Artifact, Part, TaskArtifactUpdateEvent};

/// Error type for conversions. A conversion error on an event fails the task.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("response error: {code}: {message}")]
    ResponseError { code: String, message: String },
    #[error("invalid part: {0}")]
    InvalidPart(String),
    #[error("empty input: {0}")]
    EmptyInput(String),
}

/// Metadata key set: native names or the `adk_`-prefixed interoperability
/// names, toggled by one converter flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct MetadataKeys {
    type_key: &'static str,
    object_type_key: &'static str,
    tag_key: &'static str,
}

const NATIVE_KEYS: MetadataKeys = MetadataKeys {
    type_key: "type",
    object_type_key: "object_type",
    tag_key: "tag",
};

const ADK_KEYS: MetadataKeys = MetadataKeys {
    type_key: "adk_type",
    object_type_key: "adk_object_type",
    tag_key: "adk_tag",
};

/// Data-part `type` metadata values.
pub const PART_TYPE_FUNCTION_CALL: &str = "function_call";
pub const PART_TYPE_FUNCTION_RESPONSE: &str = "function_response";
pub const PART_TYPE_EXECUTABLE_CODE: &str = "executable_code";
pub const PART_TYPE_CODE_EXECUTION_RESULT: &str = "code_execution_result";

/// Event ↔ protocol converter.
///
/// **Interaction**: Owned by the processor; streaming conversion wraps the
/// unary part builders in artifact-update frames. `last_chunk` is set only by
/// the processor's terminating status transition, never here.
#[derive(Clone, Debug, Default)]
pub struct A2aConverter {
    /// Use the `adk_`-prefixed metadata key set.
    adk_metadata_keys: bool,
    /// Code-execution compatibility bodies (`{code, language}` /
    /// `{outcome, output}`) instead of `{content}`.
    code_execution_compat: bool,
}

impl A2aConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adk_metadata_keys(mut self, enabled: bool) -> Self {
        self.adk_metadata_keys = enabled;
        self
    }

    pub fn with_code_execution_compat(mut self, enabled: bool) -> Self {
        self.code_execution_compat = enabled;
        self
    }

    fn keys(&self) -> MetadataKeys {
        if self.adk_metadata_keys {
            ADK_KEYS
        } else {
            NATIVE_KEYS
        }
    }

    // -- incoming ----------------------------------------------------------

    /// Converts an incoming protocol message into an agent event-message.
    pub fn to_agent_message(&self, message: &A2aMessage) -> Result<EventMessage, ConvertError> {
        self.parts_to_agent_message(&message.parts)
    }

    /// Part-level conversion, accepting parts by value or by reference.
    /// Text parts concatenate into `content`; file parts become file
    /// content-parts (inline bytes decoded, URIs kept as `file_id`); data
    /// parts are stringified and appended as text content-parts.
    pub fn parts_to_agent_message<P>(
        &self,
        parts: impl IntoIterator<Item = P>,
    ) -> Result<EventMessage, ConvertError>
    where
        P: Borrow<Part>,
    {
        let mut result = EventMessage {
            role: Role::User,
            ..EventMessage::default()
        };
        for part in parts {
            match part.borrow() {
                Part::Text { text, .. } => result.content.push_str(text),
                Part::File { file, .. } => {
                    let name = file.name.clone().unwrap_or_default();
                    let content_part = match (&file.bytes, &file.uri) {
                        (Some(bytes), _) => {
                            let data = BASE64.decode(bytes).map_err(|e| {
                                ConvertError::InvalidPart(format!("file bytes: {}", e))
                            })?;
                            ContentPart::File {
                                name,
                                mime_type: file.mime_type.clone(),
                                data: Some(data),
                                file_id: None,
                            }
                        }
                        (None, Some(uri)) => ContentPart::File {
                            name,
                            mime_type: file.mime_type.clone(),
                            data: None,
                            file_id: Some(uri.clone()),
                        },
                        (None, None) => {
                            return Err(ConvertError::InvalidPart(
                                "file part has neither bytes nor uri".into(),
                            ))
                        }
                    };
                    result.content_parts.push(content_part);
                }
                Part::Data { data, .. } => {
                    result.content_parts.push(ContentPart::Text {
                        text: data.to_string(),
                    });
                }
            }
        }
        Ok(result)
    }

    // -- outgoing ----------------------------------------------------------

    /// Converts one event into a unary protocol message. Returns `None`
    /// without error for events carrying no convertible content.
    pub fn to_a2a_message(&self, event: &Event) -> Result<Option<A2aMessage>, ConvertError> {
        let parts = self.event_parts(event, false)?;
        let Some(parts) = parts else {
            return Ok(None);
        };
        let mut message = A2aMessage::agent(parts);
        message.metadata = Some(self.message_metadata(event));
        Ok(Some(message))
    }

    /// Converts one event into an artifact-update frame for the streaming
    /// subscription. Delta content is preferred over full message content.
    pub fn to_a2a_artifact_update(
        &self,
        event: &Event,
        task_id: &str,
        context_id: &str,
    ) -> Result<Option<TaskArtifactUpdateEvent>, ConvertError> {
        let parts = self.event_parts(event, true)?;
        let Some(parts) = parts else {
            return Ok(None);
        };
        Ok(Some(TaskArtifactUpdateEvent {
            task_id: task_id.to_string(),
            context_id: context_id.to_string(),
            artifact: Artifact {
                artifact_id: event.response.id.clone(),
                name: None,
                parts,
            },
            last_chunk: false,
        }))
    }

    /// Shared routing: error, tool content, code execution, plain text.
    fn event_parts(
        &self,
        event: &Event,
        streaming: bool,
    ) -> Result<Option<Vec<Part>>, ConvertError> {
        if let Some(ref error) = event.response.error {
            return Err(ConvertError::ResponseError {
                code: error.code.clone(),
                message: error.message.clone(),
            });
        }

        if event.has_tool_content() {
            return Ok(Some(self.tool_parts(event)));
        }

        if self.is_code_execution(event) {
            return Ok(self.code_execution_parts(event));
        }

        let text = event
            .response
            .choices
            .first()
            .map(|choice| {
                if streaming && !choice.delta.content.is_empty() {
                    choice.delta.content.as_str()
                } else {
                    choice.message.content.as_str()
                }
            })
            .unwrap_or_default();
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(vec![Part::text(text)]))
    }

    fn is_code_execution(&self, event: &Event) -> bool {
        event.response.object == OBJECT_CODE_EXECUTION
            && matches!(
                event.tag.as_deref(),
                Some(TAG_CODE_EXECUTION) | Some(TAG_CODE_EXECUTION_RESULT)
            )
    }

    /// Tool calls become one data part per call; tool responses one data part
    /// per choice.
    fn tool_parts(&self, event: &Event) -> Vec<Part> {
        let keys = self.keys();
        let mut parts = Vec::new();
        for choice in &event.response.choices {
            if !choice.message.tool_calls.is_empty() {
                for call in &choice.message.tool_calls {
                    let mut metadata = Map::new();
                    metadata.insert(keys.type_key.into(), json!(PART_TYPE_FUNCTION_CALL));
                    parts.push(Part::data(
                        json!({
                            "id": call.id,
                            "type": call.kind,
                            "name": call.function.name,
                            "args": call.function.arguments,
                        }),
                        Some(metadata),
                    ));
                }
            } else if choice.message.role == Role::Tool || !choice.message.tool_id.is_empty() {
                let mut metadata = Map::new();
                metadata.insert(keys.type_key.into(), json!(PART_TYPE_FUNCTION_RESPONSE));
                parts.push(Part::data(
                    json!({
                        "name": choice.message.tool_name,
                        "id": choice.message.tool_id,
                        "response": choice.message.content,
                    }),
                    Some(metadata),
                ));
            }
        }
        parts
    }

    fn code_execution_parts(&self, event: &Event) -> Option<Vec<Part>> {
        let keys = self.keys();
        let content = event
            .response
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .unwrap_or_default();
        let is_result = event.tag.as_deref() == Some(TAG_CODE_EXECUTION_RESULT);

        let body = if self.code_execution_compat {
            if is_result {
                json!({ "outcome": "OUTCOME_OK", "output": content })
            } else {
                json!({ "code": content, "language": "unknown" })
            }
        } else {
            json!({ "content": content })
        };
        let part_type = if is_result {
            PART_TYPE_CODE_EXECUTION_RESULT
        } else {
            PART_TYPE_EXECUTABLE_CODE
        };
        let mut metadata = Map::new();
        metadata.insert(keys.type_key.into(), json!(part_type));
        Some(vec![Part::data(body, Some(metadata))])
    }

    /// Message-level metadata `{object_type, tag}` so consumers can
    /// reconstruct routing upstream.
    fn message_metadata(&self, event: &Event) -> Map<String, Value> {
        let keys = self.keys();
        let mut metadata = Map::new();
        metadata.insert(keys.object_type_key.into(), json!(event.response.object));
        if let Some(ref tag) = event.tag {
            metadata.insert(keys.tag_key.into(), json!(tag));
        }
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_event::{Choice, FunctionCall, ResponseError, ToolCall};

    use crate::types::FileContent;

    fn converter() -> A2aConverter {
        A2aConverter::new()
    }

    fn text_event(content: &str) -> Event {
        Event::assistant_text("e1", "inv1", "agent", content)
    }

    /// **Scenario**: A text part passed by value converts identically to the
    /// same part passed by reference.
    #[test]
    fn dual_form_parts_convert_identically() {
        let part = Part::text("hello");
        let by_value = converter()
            .parts_to_agent_message(vec![part.clone()])
            .unwrap();
        let by_reference = converter().parts_to_agent_message(vec![&part]).unwrap();
        assert_eq!(by_value, by_reference);
        assert_eq!(by_value.content, "hello");
    }

    /// **Scenario**: Text parts concatenate; data parts become text
    /// content-parts; file parts keep bytes or URI.
    #[test]
    fn incoming_part_routing() {
        let parts = vec![
            Part::text("hel"),
            Part::text("lo"),
            Part::Data {
                data: json!({"k": 1}),
                metadata: None,
            },
            Part::File {
                file: FileContent {
                    name: Some("notes.txt".into()),
                    mime_type: Some("text/plain".into()),
                    bytes: Some(BASE64.encode(b"abc")),
                    uri: None,
                },
                metadata: None,
            },
            Part::File {
                file: FileContent {
                    name: Some("remote.bin".into()),
                    uri: Some("https://files.example.com/remote.bin".into()),
                    ..FileContent::default()
                },
                metadata: None,
            },
        ];
        let message = converter().parts_to_agent_message(&parts).unwrap();
        assert_eq!(message.content, "hello");
        assert_eq!(message.content_parts.len(), 3);
        assert!(matches!(
            &message.content_parts[0],
            ContentPart::Text { text } if text.contains("\"k\"")
        ));
        assert!(matches!(
            &message.content_parts[1],
            ContentPart::File { data: Some(bytes), .. } if bytes == b"abc"
        ));
        assert!(matches!(
            &message.content_parts[2],
            ContentPart::File { file_id: Some(uri), data: None, .. }
                if uri == "https://files.example.com/remote.bin"
        ));
    }

    /// **Scenario**: A tool-call event converts to one data part per call
    /// with function_call metadata.
    #[test]
    fn tool_call_event_to_data_part() {
        let event = Event::tool_calls(
            "e1",
            "inv1",
            "agent",
            vec![ToolCall {
                id: "c1".into(),
                kind: "function".into(),
                function: FunctionCall {
                    name: "get_weather".into(),
                    arguments: "{\"city\":\"Beijing\"}".into(),
                },
            }],
        );
        let message = converter().to_a2a_message(&event).unwrap().unwrap();
        assert_eq!(message.parts.len(), 1);
        let Part::Data { data, metadata } = &message.parts[0] else {
            panic!("expected data part");
        };
        assert_eq!(data["id"], "c1");
        assert_eq!(data["type"], "function");
        assert_eq!(data["name"], "get_weather");
        assert_eq!(data["args"], "{\"city\":\"Beijing\"}");
        assert_eq!(
            metadata.as_ref().unwrap()["type"],
            PART_TYPE_FUNCTION_CALL
        );
    }

    /// **Scenario**: A tool-response event converts to a function_response
    /// data part carrying the content.
    #[test]
    fn tool_response_event_to_data_part() {
        let mut event = Event::new("e1", "inv1", "agent");
        event.response.choices.push(Choice {
            message: EventMessage::tool_response("c1", "get_weather", "{\"temp\": 21}"),
            ..Choice::default()
        });
        let message = converter().to_a2a_message(&event).unwrap().unwrap();
        let Part::Data { data, metadata } = &message.parts[0] else {
            panic!("expected data part");
        };
        assert_eq!(data["id"], "c1");
        assert_eq!(data["name"], "get_weather");
        assert_eq!(data["response"], "{\"temp\": 21}");
        assert_eq!(
            metadata.as_ref().unwrap()["type"],
            PART_TYPE_FUNCTION_RESPONSE
        );
    }

    /// **Scenario**: Code execution uses {content} normally and
    /// {code, language} / {outcome, output} in compatibility mode.
    #[test]
    fn code_execution_modes() {
        let mut event = text_event("print(1)");
        event.tag = Some(TAG_CODE_EXECUTION.into());
        event.response.object = OBJECT_CODE_EXECUTION.into();

        let standard = converter().to_a2a_message(&event).unwrap().unwrap();
        let Part::Data { data, metadata } = &standard.parts[0] else {
            panic!("expected data part");
        };
        assert_eq!(data["content"], "print(1)");
        assert_eq!(
            metadata.as_ref().unwrap()["type"],
            PART_TYPE_EXECUTABLE_CODE
        );

        let compat = converter()
            .with_code_execution_compat(true)
            .to_a2a_message(&event)
            .unwrap()
            .unwrap();
        let Part::Data { data, .. } = &compat.parts[0] else {
            panic!("expected data part");
        };
        assert_eq!(data["code"], "print(1)");
        assert_eq!(data["language"], "unknown");

        let mut result_event = text_event("1");
        result_event.tag = Some(TAG_CODE_EXECUTION_RESULT.into());
        result_event.response.object = OBJECT_CODE_EXECUTION.into();
        let compat_result = converter()
            .with_code_execution_compat(true)
            .to_a2a_message(&result_event)
            .unwrap()
            .unwrap();
        let Part::Data { data, metadata } = &compat_result.parts[0] else {
            panic!("expected data part");
        };
        assert_eq!(data["output"], "1");
        assert_eq!(
            metadata.as_ref().unwrap()["type"],
            PART_TYPE_CODE_EXECUTION_RESULT
        );
    }

    /// **Scenario**: The ADK flag switches every metadata key name; both sets
    /// carry the same values.
    #[test]
    fn metadata_key_compatibility() {
        let event = Event::tool_calls(
            "e1",
            "inv1",
            "agent",
            vec![ToolCall {
                id: "c1".into(),
                kind: "function".into(),
                function: FunctionCall::default(),
            }],
        );

        let native = converter().to_a2a_message(&event).unwrap().unwrap();
        let native_meta = native.metadata.unwrap();
        assert!(native_meta.contains_key("object_type"));
        let Part::Data { metadata, .. } = &native.parts[0] else {
            panic!("expected data part");
        };
        assert!(metadata.as_ref().unwrap().contains_key("type"));

        let adk = converter()
            .with_adk_metadata_keys(true)
            .to_a2a_message(&event)
            .unwrap()
            .unwrap();
        let adk_meta = adk.metadata.unwrap();
        assert!(adk_meta.contains_key("adk_object_type"));
        assert!(!adk_meta.contains_key("object_type"));
        let Part::Data { metadata, .. } = &adk.parts[0] else {
            panic!("expected data part");
        };
        assert!(metadata.as_ref().unwrap().contains_key("adk_type"));
    }

    /// **Scenario**: Response errors surface as conversion errors; empty
    /// events convert to None without error.
    #[test]
    fn errors_and_empty_events() {
        let mut failed = Event::new("e1", "inv1", "agent");
        failed.response.error = Some(ResponseError {
            code: "rate_limited".into(),
            message: "slow down".into(),
        });
        assert!(matches!(
            converter().to_a2a_message(&failed),
            Err(ConvertError::ResponseError { .. })
        ));

        let empty = Event::new("e2", "inv1", "agent");
        assert!(converter().to_a2a_message(&empty).unwrap().is_none());
        let blank = text_event("");
        assert!(converter().to_a2a_message(&blank).unwrap().is_none());
    }

    /// **Scenario**: Streaming conversion prefers delta content and wraps it
    /// in an artifact update keyed by the response id.
    #[test]
    fn streaming_uses_delta_and_wraps_artifact() {
        let mut event = Event::delta("e1", "inv1", "agent", "he", false);
        event.response.id = "resp-1".into();
        let update = converter()
            .to_a2a_artifact_update(&event, "task-1", "ctx-1")
            .unwrap()
            .unwrap();
        assert_eq!(update.task_id, "task-1");
        assert_eq!(update.context_id, "ctx-1");
        assert_eq!(update.artifact.artifact_id, "resp-1");
        assert!(!update.last_chunk);
        assert_eq!(update.artifact.parts, vec![Part::text("he")]);
    }

    /// **Scenario**: Outbound message metadata carries object_type and tag.
    #[test]
    fn message_metadata_carries_routing() {
        let mut event = text_event("hi");
        event.response.object = "chat.completion".into();
        event.tag = Some("notice".into());
        let message = converter().to_a2a_message(&event).unwrap().unwrap();
        let metadata = message.metadata.unwrap();
        assert_eq!(metadata["object_type"], "chat.completion");
        assert_eq!(metadata["tag"], "notice");
    }
}
