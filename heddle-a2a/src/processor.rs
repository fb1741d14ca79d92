//! A2A message processor: unary replies and streaming task orchestration.
//!
//! Each incoming message is authenticated, routed to the agent runner, and
//! its event stream translated to protocol frames. Streaming tasks walk
//! `submitted → working → (completed | failed | canceled)`; artifact updates
//! for one artifact reach the subscriber in emission order. On turn
//! completion the processor enqueues a background memory-extraction job when
//! a memory service is attached.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_event::{Event, EventMessage};
use heddle::{MemoryJob, MemoryService, UserKey};

use crate::convert::{A2aConverter, ConvertError};
use crate::runner::{AgentRunner, RunInvocation, RunnerError};
use crate::tunnel::{run_tunnel, TunnelError};
use crate::types::{
    A2aMessage, A2aStreamEvent, Part, Task, TaskState, TaskStatus, TaskStatusUpdateEvent,
};

/// Subscriber channel depth per streaming task.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

/// Error type for message processing. The serving layer maps these onto
/// protocol error frames.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("unauthenticated: no user id in auth context")]
    Unauthenticated,
    #[error("context_id required")]
    ContextIdRequired,
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error("upstream: {0}")]
    Upstream(String),
}

/// Transport-level authentication context.
#[derive(Clone, Debug, Default)]
pub struct AuthContext {
    pub user_id: Option<String>,
}

impl AuthContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }
}

/// Batching parameters for the streaming tunnel.
#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    pub app_name: String,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            app_name: "heddle".into(),
            batch_size: 4,
            flush_interval: Duration::from_millis(100),
        }
    }
}

struct TaskHandle {
    cancel: CancellationToken,
}

/// A2A message processor over an agent runner.
///
/// **Interaction**: One instance per serving process; `process_message`
/// serves unary calls, `process_streaming_message` builds a task and a
/// subscription channel. The optional memory service receives one extraction
/// job per completed turn.
pub struct A2aProcessor {
    runner: Arc<dyn AgentRunner>,
    converter: A2aConverter,
    memory: Option<Arc<dyn MemoryService>>,
    tasks: Arc<DashMap<String, TaskHandle>>,
    config: ProcessorConfig,
}

impl A2aProcessor {
    pub fn new(runner: Arc<dyn AgentRunner>) -> Self {
        Self {
            runner,
            converter: A2aConverter::new(),
            memory: None,
            tasks: Arc::new(DashMap::new()),
            config: ProcessorConfig::default(),
        }
    }

    pub fn with_converter(mut self, converter: A2aConverter) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_memory_service(mut self, memory: Arc<dyn MemoryService>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates auth and context, returning the caller's memory key and the
    /// context id.
    fn authenticate(
        &self,
        message: &A2aMessage,
        auth: &AuthContext,
    ) -> Result<(UserKey, String), ProcessorError> {
        let user_id = auth
            .user_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(ProcessorError::Unauthenticated)?;
        let context_id = message
            .context_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(ProcessorError::ContextIdRequired)?;
        Ok((
            UserKey::new(self.config.app_name.clone(), user_id),
            context_id.to_string(),
        ))
    }

    fn invocation(user_key: UserKey, context_id: &str, prompt: &str) -> RunInvocation {
        RunInvocation {
            invocation_id: uuid::Uuid::new_v4().to_string(),
            user_key,
            context_id: context_id.to_string(),
            prompt: prompt.to_string(),
        }
    }

    /// Synthetic reply for messages with no usable text part.
    fn empty_prompt_reply() -> A2aMessage {
        A2aMessage::agent(vec![Part::text(
            "no message text provided; nothing to process",
        )])
    }

    fn enqueue_memory_job(
        memory: Option<&Arc<dyn MemoryService>>,
        user_key: &UserKey,
        prompt: &str,
        reply: &str,
    ) {
        let Some(memory) = memory else {
            return;
        };
        let mut messages = vec![EventMessage::user(prompt)];
        if !reply.is_empty() {
            messages.push(EventMessage::assistant(reply));
        }
        let job = MemoryJob {
            user_key: user_key.clone(),
            messages,
        };
        let memory = Arc::clone(memory);
        tokio::spawn(async move {
            if let Err(e) = memory.enqueue_auto_memory_job(job).await {
                tracing::warn!("auto-memory enqueue failed: {}", e);
            }
        });
    }

    /// Unary mode: drain the runner's channel, accumulate assistant text,
    /// ignore tool-call framing, and return one agent message.
    pub async fn process_message(
        &self,
        message: &A2aMessage,
        auth: &AuthContext,
    ) -> Result<A2aMessage, ProcessorError> {
        let (user_key, context_id) = self.authenticate(message, auth)?;
        let Some(prompt) = message.first_text().filter(|text| !text.is_empty()) else {
            return Ok(Self::empty_prompt_reply());
        };

        let mut events = self
            .runner
            .run(Self::invocation(user_key.clone(), &context_id, prompt))
            .await?;

        let mut text = String::new();
        while let Some(event) = events.recv().await {
            if let Some(ref error) = event.response.error {
                return Err(ProcessorError::Upstream(format!(
                    "{}: {}",
                    error.code, error.message
                )));
            }
            // Tool-call framing is not part of the unary reply.
            if event.has_tool_content() {
                continue;
            }
            for choice in &event.response.choices {
                if !choice.delta.content.is_empty() {
                    text.push_str(&choice.delta.content);
                } else {
                    text.push_str(&choice.message.content);
                }
            }
        }

        Self::enqueue_memory_job(self.memory.as_ref(), &user_key, prompt, &text);

        let mut reply = A2aMessage::agent(vec![Part::text(text)]);
        reply.context_id = Some(context_id);
        Ok(reply)
    }

    /// Streaming mode: build a `submitted` task, subscribe, transition to
    /// `working`, and pipe the runner's channel through the event tunnel
    /// into artifact updates. Returns the task and the subscription.
    pub async fn process_streaming_message(
        &self,
        message: &A2aMessage,
        auth: &AuthContext,
    ) -> Result<(Task, mpsc::Receiver<A2aStreamEvent>), ProcessorError> {
        let (user_key, context_id) = self.authenticate(message, auth)?;
        let prompt = message
            .first_text()
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ConvertError::EmptyInput("no text part in message".into()))?
            .to_string();

        let task_id = uuid::Uuid::new_v4().to_string();
        let task = Task {
            id: task_id.clone(),
            context_id: context_id.clone(),
            status: TaskStatus::new(TaskState::Submitted),
            artifacts: Vec::new(),
            history: vec![message.clone()],
        };

        let events = self
            .runner
            .run(Self::invocation(user_key.clone(), &context_id, &prompt))
            .await?;

        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();
        self.tasks.insert(
            task_id.clone(),
            TaskHandle {
                cancel: cancel.clone(),
            },
        );

        let converter = self.converter.clone();
        let memory = self.memory.clone();
        let tasks = Arc::clone(&self.tasks);
        let batch_size = self.config.batch_size;
        let flush_interval = self.config.flush_interval;
        let pipe_task_id = task_id.clone();
        let pipe_context_id = context_id.clone();

        // One task per active streaming request; the subscriber owns `rx`.
        tokio::spawn(async move {
            let status = |state: TaskState, is_final: bool| {
                A2aStreamEvent::StatusUpdate(TaskStatusUpdateEvent {
                    task_id: pipe_task_id.clone(),
                    context_id: pipe_context_id.clone(),
                    status: TaskStatus::new(state),
                    is_final,
                })
            };
            let _ = tx.send(status(TaskState::Working, false)).await;

            let reply_text = Arc::new(std::sync::Mutex::new(String::new()));
            let reply_sink = Arc::clone(&reply_text);
            let subscriber = tx.clone();
            let tunnel_converter = converter.clone();
            let tunnel_task_id = pipe_task_id.clone();
            let tunnel_context_id = pipe_context_id.clone();

            let tunnel = run_tunnel(
                events,
                batch_size,
                flush_interval,
                Some(cancel),
                move |batch: Vec<Event>| {
                    let converter = tunnel_converter.clone();
                    let subscriber = subscriber.clone();
                    let task_id = tunnel_task_id.clone();
                    let context_id = tunnel_context_id.clone();
                    let reply_sink = Arc::clone(&reply_sink);
                    async move {
                        for event in &batch {
                            let update = converter
                                .to_a2a_artifact_update(event, &task_id, &context_id)
                                .map_err(|e| TunnelError::Consumer(e.to_string()))?;
                            let Some(update) = update else { continue };
                            if let Ok(mut text) = reply_sink.lock() {
                                for part in &update.artifact.parts {
                                    if let Part::Text { text: chunk, .. } = part {
                                        text.push_str(chunk);
                                    }
                                }
                            }
                            if subscriber
                                .send(A2aStreamEvent::ArtifactUpdate(update))
                                .await
                                .is_err()
                            {
                                // Subscriber went away; stop the turn cleanly.
                                return Ok(false);
                            }
                        }
                        Ok(true)
                    }
                },
            )
            .await;

            match tunnel {
                Ok(()) => {
                    let _ = tx.send(status(TaskState::Completed, true)).await;
                    let reply = reply_text.lock().map(|t| t.clone()).unwrap_or_default();
                    Self::enqueue_memory_job(memory.as_ref(), &user_key, &prompt, &reply);
                }
                Err(TunnelError::Cancelled) => {
                    let _ = tx.send(status(TaskState::Canceled, true)).await;
                }
                Err(e) => {
                    tracing::warn!("streaming turn failed: {}", e);
                    let _ = tx.send(status(TaskState::Failed, true)).await;
                }
            }
            tasks.remove(&pipe_task_id);
        });

        Ok((task, rx))
    }

    /// Cancels a live streaming task; its subscriber receives a final
    /// `canceled` transition.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        match self.tasks.get(task_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockRunner;
    use agent_event::Event;

    fn delta_events() -> Vec<Event> {
        vec![
            Event::delta("e1", "inv1", "agent", "he", false),
            Event::delta("e2", "inv1", "agent", "llo", false),
            Event::delta("e3", "inv1", "agent", "", true),
        ]
    }

    fn processor(events: Vec<Event>) -> A2aProcessor {
        A2aProcessor::new(Arc::new(MockRunner::new(events)))
    }

    fn user_message(text: &str) -> A2aMessage {
        A2aMessage::user_text("ctx-1", text)
    }

    /// **Scenario**: Missing user id or context id fail before the runner is called.
    #[tokio::test]
    async fn auth_and_context_required() {
        let p = processor(vec![]);
        let err = p
            .process_message(&user_message("hi"), &AuthContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Unauthenticated));

        let mut no_context = user_message("hi");
        no_context.context_id = None;
        let err = p
            .process_message(&no_context, &AuthContext::new("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::ContextIdRequired));
    }

    /// **Scenario**: An empty prompt returns a synthetic reply, not an error.
    #[tokio::test]
    async fn empty_prompt_synthetic_reply() {
        let p = processor(vec![]);
        let mut message = user_message("ignored");
        message.parts = vec![Part::data(serde_json::json!({}), None)];
        let reply = p
            .process_message(&message, &AuthContext::new("u1"))
            .await
            .unwrap();
        assert!(reply
            .first_text()
            .is_some_and(|text| text.contains("no message text")));
    }

    /// **Scenario**: Unary mode accumulates deltas and ignores tool framing.
    #[tokio::test]
    async fn unary_accumulates_text() {
        let mut events = delta_events();
        events.insert(
            1,
            Event::tool_calls(
                "tool-1",
                "inv1",
                "agent",
                vec![agent_event::ToolCall::default()],
            ),
        );
        let p = processor(events);
        let reply = p
            .process_message(&user_message("say hello"), &AuthContext::new("u1"))
            .await
            .unwrap();
        assert_eq!(reply.first_text(), Some("hello"));
        assert_eq!(reply.context_id.as_deref(), Some("ctx-1"));
    }

    /// **Scenario**: Streaming yields working, artifact updates whose text
    /// concatenates to the full reply, then a final completed transition.
    #[tokio::test]
    async fn streaming_pipeline() {
        let p = processor(delta_events());
        let (task, mut rx) = p
            .process_streaming_message(&user_message("say hello"), &AuthContext::new("u1"))
            .await
            .unwrap();
        assert_eq!(task.status.state, TaskState::Submitted);

        let mut text = String::new();
        let mut saw_working = false;
        let mut final_state = None;
        while let Some(event) = rx.recv().await {
            match event {
                A2aStreamEvent::StatusUpdate(update) => {
                    if update.status.state == TaskState::Working {
                        saw_working = true;
                        assert!(!update.is_final);
                    }
                    if update.is_final {
                        final_state = Some(update.status.state);
                    }
                }
                A2aStreamEvent::ArtifactUpdate(update) => {
                    assert_eq!(update.task_id, task.id);
                    for part in &update.artifact.parts {
                        if let Part::Text { text: chunk, .. } = part {
                            text.push_str(chunk);
                        }
                    }
                }
            }
        }
        assert!(saw_working);
        assert_eq!(text, "hello");
        assert_eq!(final_state, Some(TaskState::Completed));
    }

    /// **Scenario**: A runner error event fails the streaming task.
    #[tokio::test]
    async fn streaming_error_fails_task() {
        let mut failed = Event::new("e1", "inv1", "agent");
        failed.response.error = Some(agent_event::ResponseError {
            code: "boom".into(),
            message: "model exploded".into(),
        });
        let p = processor(vec![failed]);
        let (_task, mut rx) = p
            .process_streaming_message(&user_message("hi"), &AuthContext::new("u1"))
            .await
            .unwrap();

        let mut final_state = None;
        while let Some(event) = rx.recv().await {
            if let A2aStreamEvent::StatusUpdate(update) = event {
                if update.is_final {
                    final_state = Some(update.status.state);
                }
            }
        }
        assert_eq!(final_state, Some(TaskState::Failed));
    }

    /// **Scenario**: Cancelling a live task yields a final canceled transition.
    #[tokio::test]
    async fn cancel_live_task() {
        struct HangingRunner;
        #[async_trait::async_trait]
        impl crate::runner::AgentRunner for HangingRunner {
            async fn run(
                &self,
                _invocation: crate::runner::RunInvocation,
            ) -> Result<mpsc::Receiver<Event>, crate::runner::RunnerError> {
                let (tx, rx) = mpsc::channel(4);
                tokio::spawn(async move {
                    let _ = tx
                        .send(Event::delta("e1", "inv1", "agent", "partial", false))
                        .await;
                    // Keep the channel open until the subscriber goes away.
                    tx.closed().await;
                });
                Ok(rx)
            }
        }

        let p = A2aProcessor::new(Arc::new(HangingRunner));
        let (task, mut rx) = p
            .process_streaming_message(&user_message("hi"), &AuthContext::new("u1"))
            .await
            .unwrap();

        // Drain until the first artifact arrives, then cancel.
        let mut final_state = None;
        let mut cancelled = false;
        while let Some(event) = rx.recv().await {
            match event {
                A2aStreamEvent::ArtifactUpdate(_) if !cancelled => {
                    assert!(p.cancel_task(&task.id));
                    cancelled = true;
                }
                A2aStreamEvent::StatusUpdate(update) if update.is_final => {
                    final_state = Some(update.status.state);
                }
                _ => {}
            }
        }
        assert_eq!(final_state, Some(TaskState::Canceled));
        assert!(!p.cancel_task(&task.id));
    }

    /// **Scenario**: A completed turn enqueues one auto-memory job carrying
    /// the prompt and the reply.
    #[tokio::test]
    async fn turn_completion_enqueues_memory_job() {
        use heddle::memory::MockExtractor;
        use heddle::{MemoryFacade, MemoryOptions};

        let extractor = Arc::new(MockExtractor::new(vec![
            heddle::memory::MemoryOperation::Add {
                text: "User greeted the agent".into(),
                topics: vec![],
            },
        ]));
        let memory: Arc<dyn MemoryService> = Arc::new(
            MemoryFacade::in_memory(MemoryOptions::new().with_extractor(extractor.clone()))
                .unwrap(),
        );

        let p = processor(delta_events()).with_memory_service(Arc::clone(&memory));
        let reply = p
            .process_message(&user_message("say hello"), &AuthContext::new("u1"))
            .await
            .unwrap();
        assert_eq!(reply.first_text(), Some("hello"));

        // The job runs on a background worker; poll briefly for the entry.
        let key = UserKey::new("heddle", "u1");
        let mut entries = Vec::new();
        for _ in 0..50 {
            entries = memory.read_memories(&key, 0).await.unwrap();
            if !entries.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].memory.text, "User greeted the agent");
    }
}
