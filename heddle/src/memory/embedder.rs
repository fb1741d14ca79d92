//! Embedder trait for the vector memory backend. Produces vectors from text
//! for add and search.
//!
//! Implementations can wrap OpenAI, HuggingFace, or mock embedders for tests.

use async_trait::async_trait;

use crate::memory::service::MemoryError;

/// Produces fixed-size float vectors from text. Used by
/// [`crate::memory::VectorBackend`] to embed memory text on add and query
/// text on search.
///
/// Implementations must be `Send + Sync` for use with async backend methods.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds each text into a vector of dimension [`Embedder::dimension`].
    /// Returns one vector per input text in the same order.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, MemoryError>;

    /// Vector dimension returned by [`Embedder::embed`].
    fn dimension(&self) -> usize;
}

/// Deterministic embedder for tests: hashes characters into a small vector so
/// identical texts are identical vectors.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, MemoryError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dimension];
                for (i, c) in text.chars().enumerate() {
                    vector[i % self.dimension] += (c as u32 % 97) as f32;
                }
                vector
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
