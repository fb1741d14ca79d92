//! Agent runner seam: the external collaborator that executes a turn.
//!
//! The processor only needs a channel of events per invocation; the actual
//! agent graph, model calls, and tool execution live behind this trait.

use async_trait::async_trait;
use tokio::sync::mpsc;

use agent_event::Event;
use heddle::UserKey;

/// Error type for launching a run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("runner: {0}")]
    Failed(String),
}

/// One turn to execute.
#[derive(Clone, Debug)]
pub struct RunInvocation {
    pub invocation_id: String,
    pub user_key: UserKey,
    /// Conversation thread id, carried from the protocol message.
    pub context_id: String,
    pub prompt: String,
}

/// Executes one turn and streams events back on the returned channel. The
/// channel closes when the turn is complete.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, invocation: RunInvocation) -> Result<mpsc::Receiver<Event>, RunnerError>;
}

/// Fixed-script runner for tests: replays the configured events per run.
pub struct MockRunner {
    events: std::sync::Mutex<Vec<Event>>,
}

impl MockRunner {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events: std::sync::Mutex::new(events),
        }
    }
}

#[async_trait]
impl AgentRunner for MockRunner {
    async fn run(&self, _invocation: RunInvocation) -> Result<mpsc::Receiver<Event>, RunnerError> {
        let events = self
            .events
            .lock()
            .map_err(|e| RunnerError::Failed(format!("mock runner poisoned: {}", e)))?
            .clone();
        let (tx, rx) = mpsc::channel(events.len().max(1));
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}
