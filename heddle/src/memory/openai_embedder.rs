//! OpenAI Embeddings implementation of [`Embedder`].
//!
//! Tuned for how the vector backend calls it: search embeds one query string,
//! while backfills and extraction batches can hand over a whole page of
//! memories at once. Requests are therefore chunked, results re-ordered by
//! the response index, and transient API failures retried with backoff so a
//! background extraction job does not lose a fact to one 429.
//!
//! Requires `OPENAI_API_KEY` unless a custom config is supplied.

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::embeddings::{CreateEmbeddingRequest, EmbeddingInput},
    Client,
};
use async_trait::async_trait;

use crate::memory::embedder::Embedder;
use crate::memory::service::MemoryError;

/// Inputs per embeddings request; memory pages stay well under this.
const DEFAULT_BATCH_SIZE: usize = 64;
const DEFAULT_DIMENSIONS: usize = 1536;
const DEFAULT_MAX_RETRIES: u32 = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// OpenAI Embeddings client implementing [`Embedder`].
///
/// **Interaction**: Passed to [`crate::memory::VectorBackend`] through the
/// memory options; `embed` is awaited from backend add and search.
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: usize,
    batch_size: usize,
    max_retries: u32,
}

impl OpenAiEmbedder {
    /// New embedder for the given model; API key comes from `OPENAI_API_KEY`.
    /// Defaults to 1536 dimensions (override with
    /// [`OpenAiEmbedder::with_dimensions`] for other models).
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
            dimensions: DEFAULT_DIMENSIONS,
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Custom configuration (key, base URL, or any OpenAI-compatible
    /// provider).
    pub fn with_config(mut self, config: OpenAIConfig) -> Self {
        self.client = Client::with_config(config);
        self
    }

    /// Sets the vector dimension. For `text-embedding-3-*` models the
    /// requested dimension is also sent to the API, so stored vectors can be
    /// shrunk to cut memory per entry; other models only report it.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Only the third-generation models accept a `dimensions` request field.
    fn supports_reduced_dimensions(model: &str) -> bool {
        model.starts_with("text-embedding-3")
    }

    /// One embeddings call for a chunk, retried with doubling backoff.
    async fn embed_chunk(&self, chunk: &[&str]) -> Result<Vec<Vec<f32>>, MemoryError> {
        let request = CreateEmbeddingRequest {
            input: EmbeddingInput::StringArray(chunk.iter().map(|s| s.to_string()).collect()),
            model: self.model.clone(),
            dimensions: Self::supports_reduced_dimensions(&self.model)
                .then_some(self.dimensions as u32),
            ..Default::default()
        };

        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 0;
        let response = loop {
            match self.client.embeddings().create(request.clone()).await {
                Ok(response) => break response,
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "embeddings request failed (attempt {}/{}): {}",
                        attempt,
                        self.max_retries,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(MemoryError::Upstream(format!("embeddings api: {}", e))),
            }
        };

        // The API may answer out of order; the index field restores the
        // pairing with the chunk.
        let mut data = response.data;
        data.sort_by_key(|embedding| embedding.index);
        if data.len() != chunk.len() {
            return Err(MemoryError::Upstream(format!(
                "embeddings api returned {} vectors for {} inputs",
                data.len(),
                chunk.len()
            )));
        }
        Ok(data.into_iter().map(|embedding| embedding.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, MemoryError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_chunk(chunk).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }
}
