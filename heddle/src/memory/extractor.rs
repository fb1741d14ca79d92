//! Memory extractor seam: mines memory operations from conversation turns.
//!
//! The worker pool calls [`MemoryExtractor::extract`] with the turn's messages
//! and the user's existing memories, then applies the returned operations
//! through the owning service. Implementations: [`crate::memory::LlmExtractor`]
//! (chat model), [`MockExtractor`] (fixed ops, tests).

use async_trait::async_trait;

use agent_event::EventMessage;

use crate::memory::entry::MemoryEntry;
use crate::memory::service::MemoryError;

/// One storage mutation produced by extraction.
#[derive(Clone, Debug, PartialEq)]
pub enum MemoryOperation {
    Add { text: String, topics: Vec<String> },
    Update {
        memory_id: String,
        text: String,
        topics: Vec<String>,
    },
    Delete { memory_id: String },
}

/// Descriptive metadata for an extractor (model name, prompt source).
#[derive(Clone, Debug, Default)]
pub struct ExtractorMetadata {
    pub name: String,
    pub model: String,
}

/// Extracts atomic memory facts from a conversation turn.
///
/// **Interaction**: Configured through the memory options; its presence
/// switches the service into auto mode (write tools hidden from the agent,
/// see the facade). `set_enabled_tools` tells the extractor which tools the
/// agent still sees so its prompt can reflect availability.
#[async_trait]
pub trait MemoryExtractor: Send + Sync {
    /// Produces operations for this turn given the user's existing memories.
    async fn extract(
        &self,
        messages: &[EventMessage],
        existing: &[MemoryEntry],
    ) -> Result<Vec<MemoryOperation>, MemoryError>;

    /// Gate: false skips extraction for this turn entirely.
    fn should_extract(&self, messages: &[EventMessage]) -> bool {
        messages
            .iter()
            .any(|m| m.role == agent_event::Role::User && !m.content.trim().is_empty())
    }

    /// Replaces the extraction prompt.
    fn set_prompt(&self, _prompt: String) {}

    /// Replaces the model used for extraction.
    fn set_model(&self, _model: String) {}

    /// Informs the extractor which memory tools the agent can still call.
    fn set_enabled_tools(&self, _tools: Vec<String>) {}

    fn metadata(&self) -> ExtractorMetadata {
        ExtractorMetadata::default()
    }
}

/// Fixed-response extractor for tests: returns the configured operations on
/// every call and records how often it ran.
pub struct MockExtractor {
    operations: std::sync::Mutex<Vec<MemoryOperation>>,
    pub calls: std::sync::atomic::AtomicUsize,
}

impl MockExtractor {
    pub fn new(operations: Vec<MemoryOperation>) -> Self {
        Self {
            operations: std::sync::Mutex::new(operations),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Extractor that produces no operations.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl MemoryExtractor for MockExtractor {
    async fn extract(
        &self,
        _messages: &[EventMessage],
        _existing: &[MemoryEntry],
    ) -> Result<Vec<MemoryOperation>, MemoryError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self
            .operations
            .lock()
            .map_err(|_| MemoryError::Storage("mock extractor poisoned".into()))?
            .clone())
    }

    fn metadata(&self) -> ExtractorMetadata {
        ExtractorMetadata {
            name: "mock".into(),
            model: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: should_extract requires a non-empty user message.
    #[test]
    fn should_extract_gates_on_user_content() {
        let extractor = MockExtractor::empty();
        assert!(!extractor.should_extract(&[]));
        assert!(!extractor.should_extract(&[EventMessage::assistant("hi")]));
        assert!(!extractor.should_extract(&[EventMessage::user("   ")]));
        assert!(extractor.should_extract(&[EventMessage::user("I moved to Berlin")]));
    }
}
