//! Auto-memory worker pool: background extraction of memories per turn.
//!
//! Jobs are routed to one of `N` bounded queues by an FNV-1a hash of
//! `(app_name, user_id)`, which pins each user to one worker and keeps
//! extraction serial per user (extraction reads existing memories and issues
//! updates, so concurrent extraction for one user would race). A full queue
//! falls back to synchronous extraction on the caller instead of blocking or
//! dropping the job.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

use agent_event::EventMessage;

use crate::memory::backend::MemoryBackend;
use crate::memory::entry::{MemoryKey, UserKey};
use crate::memory::extractor::{MemoryExtractor, MemoryOperation};
use crate::memory::service::MemoryError;

/// Defaults mirror the configuration surface: one queue of ten jobs, 30 s per
/// job, at most 50 existing memories handed to the extractor.
pub const DEFAULT_QUEUE_COUNT: usize = 1;
pub const DEFAULT_QUEUE_SIZE: usize = 10;
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_EXISTING: usize = 50;

/// One background extraction job: the user it belongs to and the turn's
/// messages. Owned by the pool from enqueue until processed.
#[derive(Clone, Debug)]
pub struct MemoryJob {
    pub user_key: UserKey,
    pub messages: Vec<EventMessage>,
}

/// Worker pool sizing and per-job limits.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub queue_count: usize,
    pub queue_size: usize,
    pub job_timeout: Duration,
    pub max_existing: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_count: DEFAULT_QUEUE_COUNT,
            queue_size: DEFAULT_QUEUE_SIZE,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            max_existing: DEFAULT_MAX_EXISTING,
        }
    }
}

/// Hashed-shard worker pool for background memory extraction.
///
/// **Interaction**: Owned by the facade, which starts it iff an extractor is
/// configured and stops it on close. Queued jobs are detached from the
/// caller: cancelling the caller after a successful enqueue does not cancel
/// the job, which runs under its own timeout.
pub struct AutoMemoryPool {
    backend: Arc<dyn MemoryBackend>,
    extractor: Arc<dyn MemoryExtractor>,
    config: WorkerConfig,
    senders: std::sync::Mutex<Vec<mpsc::Sender<MemoryJob>>>,
    tracker: TaskTracker,
}

impl AutoMemoryPool {
    /// New pool in the not-started state; [`AutoMemoryPool::enqueue`] runs
    /// jobs synchronously until [`AutoMemoryPool::start`] is called.
    pub fn new(
        backend: Arc<dyn MemoryBackend>,
        extractor: Arc<dyn MemoryExtractor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            backend,
            extractor,
            config: WorkerConfig {
                queue_count: config.queue_count.max(1),
                queue_size: config.queue_size.max(1),
                ..config
            },
            senders: std::sync::Mutex::new(Vec::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Spawns one worker per queue. Calling start twice is a no-op.
    pub fn start(&self) {
        let mut senders = match self.senders.lock() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("worker pool senders lock poisoned: {}", e);
                return;
            }
        };
        if !senders.is_empty() {
            return;
        }
        for _ in 0..self.config.queue_count {
            let (tx, mut rx) = mpsc::channel::<MemoryJob>(self.config.queue_size);
            senders.push(tx);
            let backend = Arc::clone(&self.backend);
            let extractor = Arc::clone(&self.extractor);
            let job_timeout = self.config.job_timeout;
            let max_existing = self.config.max_existing;
            self.tracker.spawn(async move {
                while let Some(job) = rx.recv().await {
                    let work = tokio::time::timeout(
                        job_timeout,
                        process_job(&backend, &extractor, max_existing, job),
                    );
                    match std::panic::AssertUnwindSafe(work).catch_unwind().await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => tracing::warn!("memory extraction job timed out"),
                        Err(_) => tracing::error!("memory worker recovered from panic"),
                    }
                }
            });
        }
    }

    /// Routes the job to its user's queue; runs it synchronously on the
    /// caller when the queue is full or the pool is not started.
    pub async fn enqueue(&self, job: MemoryJob) -> Result<(), MemoryError> {
        job.user_key.validate()?;
        let sender = {
            let senders = self
                .senders
                .lock()
                .map_err(|e| MemoryError::Storage(format!("worker pool lock: {}", e)))?;
            if senders.is_empty() {
                None
            } else {
                let shard = shard_index(&job.user_key, senders.len());
                Some(senders[shard].clone())
            }
        };

        let job = match sender {
            None => job,
            Some(tx) => match tx.try_send(job) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::TrySendError::Full(job)) => {
                    tracing::debug!("memory queue full, extracting synchronously");
                    job
                }
                Err(mpsc::error::TrySendError::Closed(job)) => job,
            },
        };
        // Back-pressure fallback: extract on the caller under its deadline.
        process_job(&self.backend, &self.extractor, self.config.max_existing, job).await;
        Ok(())
    }

    /// Closes every queue and joins all workers.
    pub async fn stop(&self) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.clear();
        }
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// FNV-1a 32-bit hash, used for shard routing.
fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Queue index for a user: `fnv1a_32(app_name ++ user_id) mod queues`.
fn shard_index(key: &UserKey, queues: usize) -> usize {
    let mut input = Vec::with_capacity(key.app_name.len() + key.user_id.len());
    input.extend_from_slice(key.app_name.as_bytes());
    input.extend_from_slice(key.user_id.as_bytes());
    fnv1a_32(&input) as usize % queues
}

/// Runs one extraction: read existing memories, ask the extractor, apply the
/// operations. Per-operation errors are logged and do not abort the batch.
async fn process_job(
    backend: &Arc<dyn MemoryBackend>,
    extractor: &Arc<dyn MemoryExtractor>,
    max_existing: usize,
    job: MemoryJob,
) {
    if !extractor.should_extract(&job.messages) {
        return;
    }
    let existing = match backend.read(&job.user_key, max_existing).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("memory extraction: read existing failed: {}", e);
            return;
        }
    };
    let operations = match extractor.extract(&job.messages, &existing).await {
        Ok(ops) => ops,
        Err(e) => {
            tracing::warn!("memory extraction failed: {}", e);
            return;
        }
    };
    for operation in operations {
        if let Err(e) = apply_operation(backend, &job.user_key, operation).await {
            tracing::warn!("memory operation failed: {}", e);
        }
    }
}

async fn apply_operation(
    backend: &Arc<dyn MemoryBackend>,
    user_key: &UserKey,
    operation: MemoryOperation,
) -> Result<(), MemoryError> {
    match operation {
        MemoryOperation::Add { text, topics } => {
            backend.add(user_key, text, topics).await.map(|_| ())
        }
        MemoryOperation::Update {
            memory_id,
            text,
            topics,
        } => backend
            .update(&MemoryKey::from_user(user_key, memory_id), text, topics)
            .await
            .map(|_| ()),
        MemoryOperation::Delete { memory_id } => {
            backend
                .delete(&MemoryKey::from_user(user_key, memory_id))
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::backend::BackendPolicy;
    use crate::memory::extractor::MockExtractor;
    use crate::memory::in_memory::InMemoryBackend;

    fn job(user: &str, content: &str) -> MemoryJob {
        MemoryJob {
            user_key: UserKey::new("app", user),
            messages: vec![EventMessage::user(content)],
        }
    }

    /// **Scenario**: FNV-1a 32 matches the reference constants for known inputs.
    #[test]
    fn fnv1a_reference_values() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
    }

    /// **Scenario**: Jobs with the same (app, user) always land on the same queue index.
    #[test]
    fn shard_routing_is_deterministic() {
        let key = UserKey::new("app", "user-42");
        let first = shard_index(&key, 4);
        for _ in 0..10 {
            assert_eq!(shard_index(&key, 4), first);
        }
        assert!(first < 4);
    }

    /// **Scenario**: Enqueued job is processed by a worker and its operations applied.
    #[tokio::test]
    async fn worker_applies_extracted_operations() {
        let backend: Arc<dyn MemoryBackend> = Arc::new(InMemoryBackend::default());
        let extractor = Arc::new(MockExtractor::new(vec![MemoryOperation::Add {
            text: "User works at Example Corp".into(),
            topics: vec!["work".into()],
        }]));
        let pool = AutoMemoryPool::new(
            Arc::clone(&backend),
            extractor.clone(),
            WorkerConfig::default(),
        );
        pool.start();
        pool.enqueue(job("u1", "I work at Example Corp")).await.unwrap();
        pool.stop().await;

        let entries = backend.read(&UserKey::new("app", "u1"), 0).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].memory.text, "User works at Example Corp");
    }

    /// **Scenario**: Not-started pool runs the extraction synchronously.
    #[tokio::test]
    async fn unstarted_pool_runs_inline() {
        let backend: Arc<dyn MemoryBackend> = Arc::new(InMemoryBackend::default());
        let extractor = Arc::new(MockExtractor::new(vec![MemoryOperation::Add {
            text: "inline fact".into(),
            topics: vec![],
        }]));
        let pool = AutoMemoryPool::new(Arc::clone(&backend), extractor, WorkerConfig::default());
        pool.enqueue(job("u1", "hello")).await.unwrap();

        let entries = backend.read(&UserKey::new("app", "u1"), 0).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    /// **Scenario**: Per-operation failures do not abort the rest of the batch.
    #[tokio::test]
    async fn failed_operation_does_not_abort_batch() {
        let backend: Arc<dyn MemoryBackend> = Arc::new(InMemoryBackend::default());
        let extractor = Arc::new(MockExtractor::new(vec![
            MemoryOperation::Update {
                memory_id: "missing".into(),
                text: "x".into(),
                topics: vec![],
            },
            MemoryOperation::Add {
                text: "still added".into(),
                topics: vec![],
            },
        ]));
        let pool = AutoMemoryPool::new(Arc::clone(&backend), extractor, WorkerConfig::default());
        pool.enqueue(job("u1", "hello")).await.unwrap();

        let entries = backend.read(&UserKey::new("app", "u1"), 0).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].memory.text, "still added");
    }

    /// **Scenario**: Quota failure inside a batch is swallowed and logged.
    #[tokio::test]
    async fn quota_error_is_swallowed_in_background() {
        let backend: Arc<dyn MemoryBackend> = Arc::new(InMemoryBackend::new(BackendPolicy {
            soft_delete: true,
            memory_limit: Some(1),
        }));
        let extractor = Arc::new(MockExtractor::new(vec![
            MemoryOperation::Add {
                text: "one".into(),
                topics: vec![],
            },
            MemoryOperation::Add {
                text: "two".into(),
                topics: vec![],
            },
        ]));
        let pool = AutoMemoryPool::new(Arc::clone(&backend), extractor, WorkerConfig::default());
        pool.enqueue(job("u1", "hello")).await.unwrap();

        let entries = backend.read(&UserKey::new("app", "u1"), 0).await.unwrap();
        assert_eq!(entries.len(), 1);
    }
}
